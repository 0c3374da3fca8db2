//! Collaborator traits consumed by the getter.
//!
//! The getter never talks to a store client or a logging backend directly.
//! It only needs the three store capabilities and a warning sink defined
//! here, so any Redis, Memcached or in-process implementation can sit
//! behind it.

use async_trait::async_trait;
use coalesce_core::{CacheTtl, StoreResult};
use serde_json::Value;

/// Key-value store with per-entry expiry.
///
/// Implementations should be thread-safe and support concurrent access; the
/// getter shares one store handle across all of its callers.
///
/// # Error Contract
///
/// Every transport, timeout or availability problem must be reported as
/// [`coalesce_core::StoreError::Unavailable`]. An absent or expired entry is
/// `Ok(None)`, never an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw bytes stored under `key`.
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any existing entry. The store
    /// must treat the entry as absent once `ttl` has elapsed.
    async fn write_with_expiry(&self, key: &str, bytes: &[u8], ttl: CacheTtl) -> StoreResult<()>;

    /// Remove the entry under `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Sink for the warnings the getter emits when the cache layer misbehaves.
pub trait CacheLogger: Send + Sync {
    /// Record a warning with optional structured context.
    fn warn(&self, message: &str, context: Option<&Value>);
}
