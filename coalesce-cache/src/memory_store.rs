//! Process-local key-value store with per-entry expiry.
//!
//! Expiry is lazy: an expired entry reads as absent and is dropped the next
//! time it is written, or when [`InMemoryStore::purge_expired`] runs.
//! Time comes from `tokio::time::Instant`, so tests can drive expiry with a
//! paused clock.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use coalesce_core::{CacheTtl, StoreError, StoreOperation, StoreResult};
use tokio::time::Instant;

use crate::traits::KeyValueStore;

// Expiry used when a TTL is too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
struct StoredEntry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory [`KeyValueStore`].
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(InMemoryStore::new());
/// let getter = CacheAsideGetter::new(store.clone(), Arc::new(TracingLogger));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired(now));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    fn read_entries(
        &self,
        operation: StoreOperation,
        key: &str,
    ) -> StoreResult<RwLockReadGuard<'_, HashMap<String, StoredEntry>>> {
        self.entries
            .read()
            .map_err(|_| StoreError::unavailable(operation, key, "store lock poisoned"))
    }

    fn write_entries(
        &self,
        operation: StoreOperation,
        key: &str,
    ) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, StoredEntry>>> {
        self.entries
            .write()
            .map_err(|_| StoreError::unavailable(operation, key, "store lock poisoned"))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let entries = self.read_entries(StoreOperation::Read, key)?;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.bytes.clone()))
    }

    async fn write_with_expiry(&self, key: &str, bytes: &[u8], ttl: CacheTtl) -> StoreResult<()> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.as_duration())
            .unwrap_or_else(|| now + FAR_FUTURE);
        let mut entries = self.write_entries(StoreOperation::Write, key)?;
        entries.insert(
            key.to_string(),
            StoredEntry {
                bytes: bytes.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.write_entries(StoreOperation::Delete, key)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttl(secs: u64) -> CacheTtl {
        CacheTtl::from_secs(secs).unwrap()
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let store = InMemoryStore::new();
        assert_eq!(store.read("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = InMemoryStore::new();
        store.write_with_expiry("k", b"v", ttl(60)).await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let store = InMemoryStore::new();
        store.write_with_expiry("k", b"one", ttl(60)).await.unwrap();
        store.write_with_expiry("k", b"two", ttl(60)).await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.write_with_expiry("k", b"v", ttl(60)).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = InMemoryStore::new();
        store.write_with_expiry("k", b"v", ttl(1)).await.unwrap();

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(store.read("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(store.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let store = InMemoryStore::new();
        store.write_with_expiry("k", b"v", ttl(u64::MAX)).await.unwrap();
        assert!(store.read("k").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryStore::new();
        store.write_with_expiry("short", b"v", ttl(1)).await.unwrap();
        store.write_with_expiry("long", b"v", ttl(3600)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.read("long").await.unwrap().is_some());
    }
}
