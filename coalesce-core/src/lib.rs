//! Coalesce Core - Request Types
//!
//! Validated cache keys and TTLs plus the error taxonomy shared by the
//! getter, store adapters and test utilities. No I/O lives here.

mod error;

pub use error::{
    CodecError, CoalesceError, CoalesceResult, ConfigError, StoreError, StoreOperation,
    StoreResult, ValidationError,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// CACHE KEY
// ============================================================================

/// Identifies one entry in the key-value store.
///
/// Always non-empty. Construct with [`CacheKey::new`] or `TryFrom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// CACHE TTL
// ============================================================================

/// Expiry applied to a stored value, in whole seconds. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct CacheTtl(u64);

impl CacheTtl {
    pub fn from_secs(seconds: u64) -> Result<Self, ValidationError> {
        if seconds == 0 {
            return Err(ValidationError::NonPositiveTtl { seconds });
        }
        Ok(Self(seconds))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl TryFrom<u64> for CacheTtl {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_secs(value)
    }
}

impl From<CacheTtl> for u64 {
    fn from(ttl: CacheTtl) -> Self {
        ttl.0
    }
}

impl From<CacheTtl> for Duration {
    fn from(ttl: CacheTtl) -> Self {
        ttl.as_duration()
    }
}

impl fmt::Display for CacheTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
