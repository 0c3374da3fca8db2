//! Error types for coalesce operations

use thiserror::Error;

/// Key-value store errors.
///
/// Store implementations report every transport or availability problem as
/// `Unavailable`. The getter never surfaces these to its callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable during {operation} of {key}: {reason}")]
    Unavailable {
        operation: StoreOperation,
        key: String,
        reason: String,
    },
}

impl StoreError {
    /// Shorthand for building an `Unavailable` error.
    pub fn unavailable(
        operation: StoreOperation,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Unavailable {
            operation,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// The store operation that failed.
    pub fn operation(&self) -> StoreOperation {
        match self {
            Self::Unavailable { operation, .. } => *operation,
        }
    }

    /// The key the failed operation targeted.
    pub fn key(&self) -> &str {
        match self {
            Self::Unavailable { key, .. } => key,
        }
    }
}

/// The three capabilities the getter uses on a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Read,
    Write,
    Delete,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization errors for stored values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode value: {reason}")]
    Encode { reason: String },

    /// The stored bytes are malformed and cannot be turned back into a value.
    #[error("Malformed stored data: {reason}")]
    Decode { reason: String },
}

impl CodecError {
    pub fn encode(err: impl std::fmt::Display) -> Self {
        Self::Encode {
            reason: err.to_string(),
        }
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode {
            reason: err.to_string(),
        }
    }
}

/// Request validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cache key must not be empty")]
    EmptyKey,

    #[error("Cache TTL must be greater than 0 seconds, got {seconds}")]
    NonPositiveTtl { seconds: u64 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },
}

/// Master error type for all coalesce errors.
#[derive(Debug, Clone, Error)]
pub enum CoalesceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CoalesceError {
    /// The store operation behind this error, if it came from the store.
    pub fn store_operation(&self) -> Option<StoreOperation> {
        match self {
            Self::Store(err) => Some(err.operation()),
            _ => None,
        }
    }
}

/// Result type alias for coalesce operations.
pub type CoalesceResult<T> = Result<T, CoalesceError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================
