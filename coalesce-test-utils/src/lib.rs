//! Coalesce Test Utilities
//!
//! Centralized test infrastructure for the coalesce workspace:
//! - Mock collaborators (recording logger, fault-injecting store)
//! - Call-counting fetch helpers
//! - Proptest generators for keys, TTLs and JSON values
//! - Custom assertions for logger output

// Re-export the types every test needs
pub use coalesce_cache::{
    CacheAsideGetter, CacheKey, CacheLogger, CacheRequest, CacheTtl, GetterStats, InMemoryStore,
    KeyValueStore, StoreError, StoreOperation, StoreResult,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// One warning captured by [`RecordingLogger`].
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub message: String,
    pub context: Option<Value>,
}

/// Logger that keeps every warning in memory for later inspection.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    warnings: Mutex<Vec<Warning>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.warnings().into_iter().map(|w| w.message).collect()
    }

    pub fn len(&self) -> usize {
        self.warnings.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Warnings whose context names the given store operation.
    pub fn for_operation(&self, operation: StoreOperation) -> Vec<Warning> {
        self.warnings()
            .into_iter()
            .filter(|w| {
                w.context
                    .as_ref()
                    .and_then(|c| c.get("operation"))
                    .and_then(Value::as_str)
                    == Some(operation.as_str())
            })
            .collect()
    }
}

impl CacheLogger for RecordingLogger {
    fn warn(&self, message: &str, context: Option<&Value>) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(Warning {
                message: message.to_string(),
                context: context.cloned(),
            });
        }
    }
}

/// In-memory store whose operations can be switched to fail on demand.
///
/// Every call through the [`KeyValueStore`] trait is counted, whether it
/// fails or not. [`seed`](Self::seed) and [`peek`](Self::peek) bypass both
/// the counters and the failure switches.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    fail_read: AtomicBool,
    fail_write: AtomicBool,
    fail_delete: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that is down for every operation.
    pub fn unavailable() -> Self {
        let store = Self::new();
        store.fail_reads(true);
        store.fail_writes(true);
        store.fail_deletes(true);
        store
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_read.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Place raw bytes under `key`, e.g. to plant a malformed entry.
    pub async fn seed(&self, key: &str, bytes: &[u8], ttl: CacheTtl) {
        // The inner store only fails on a poisoned lock, which tests never cause.
        let _ = self.inner.write_with_expiry(key, bytes, ttl).await;
    }

    /// Raw bytes currently stored under `key`.
    pub async fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read(key).await.ok().flatten()
    }

    fn check(&self, flag: &AtomicBool, operation: StoreOperation, key: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::unavailable(operation, key, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_read, StoreOperation::Read, key)?;
        self.inner.read(key).await
    }

    async fn write_with_expiry(&self, key: &str, bytes: &[u8], ttl: CacheTtl) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_write, StoreOperation::Write, key)?;
        self.inner.write_with_expiry(key, bytes, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_delete, StoreOperation::Delete, key)?;
        self.inner.delete(key).await
    }
}

// ============================================================================
// FETCH HELPERS
// ============================================================================

/// Shared counter handing out fetch closures.
///
/// The count goes up when a closure is invoked, before its future is
/// polled, so it reflects how many fetches the getter started.
#[derive(Debug, Clone, Default)]
pub struct FetchCounter {
    calls: Arc<AtomicUsize>,
}

impl FetchCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fetch that resolves immediately with `value`.
    pub fn returning<R, V, E>(&self, value: V) -> impl FnOnce(R) -> BoxFuture<'static, Result<V, E>>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        self.with::<R, V, E, _>(move |_| Ok(value))
    }

    /// Fetch that resolves immediately with `error`.
    pub fn failing<R, V, E>(&self, error: E) -> impl FnOnce(R) -> BoxFuture<'static, Result<V, E>>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        self.with::<R, V, E, _>(move |_| Err(error))
    }

    /// Fetch that sleeps for `delay` before resolving with `value`.
    pub fn delayed<R, V, E>(
        &self,
        delay: Duration,
        value: V,
    ) -> impl FnOnce(R) -> BoxFuture<'static, Result<V, E>>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        let calls = Arc::clone(&self.calls);
        move |_: R| -> BoxFuture<'static, Result<V, E>> {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(value)
            })
        }
    }

    /// Fetch whose outcome is computed from its 1-based call number.
    pub fn with<R, V, E, G>(&self, outcome: G) -> impl FnOnce(R) -> BoxFuture<'static, Result<V, E>>
    where
        V: Send + 'static,
        E: Send + 'static,
        G: FnOnce(usize) -> Result<V, E> + Send + 'static,
    {
        let calls = Arc::clone(&self.calls);
        move |_: R| -> BoxFuture<'static, Result<V, E>> {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let result = outcome(call);
            Box::pin(async move { result })
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for coalesce types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid cache key in the `segment:segment` style.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        "[a-z][a-z0-9_-]{0,15}(:[a-z0-9_-]{1,15}){0,3}".prop_map(|s| {
            CacheKey::new(s).unwrap_or_else(|_| unreachable!("pattern never yields an empty key"))
        })
    }

    /// Generate a TTL between one second and one day.
    pub fn arb_cache_ttl() -> impl Strategy<Value = CacheTtl> {
        (1u64..=86_400).prop_map(|secs| {
            CacheTtl::from_secs(secs).unwrap_or_else(|_| unreachable!("range starts at 1"))
        })
    }

    /// Generate a JSON leaf value.
    pub fn arb_json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<u64>().prop_map(Value::from),
            proptest::num::f64::NORMAL.prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,32}".prop_map(Value::String),
        ]
    }

    /// Generate a nested JSON document.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        arb_json_leaf().prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,12}", inner, 0..8)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over captured logger output.

    use super::*;

    /// Assert that at least one warning message contains `needle`.
    #[track_caller]
    pub fn assert_warned(logger: &RecordingLogger, needle: &str) {
        let messages = logger.messages();
        assert!(
            messages.iter().any(|m| m.contains(needle)),
            "Expected a warning containing {:?}, got: {:?}",
            needle,
            messages
        );
    }

    /// Assert that nothing was logged.
    #[track_caller]
    pub fn assert_no_warnings(logger: &RecordingLogger) {
        let messages = logger.messages();
        assert!(messages.is_empty(), "Expected no warnings, got: {:?}", messages);
    }

    /// Assert that the getter started exactly `expected` fetches.
    #[track_caller]
    pub fn assert_fetches(counter: &FetchCounter, expected: usize) {
        assert_eq!(
            counter.calls(),
            expected,
            "Expected {} fetch invocation(s), got {}",
            expected,
            counter.calls()
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
