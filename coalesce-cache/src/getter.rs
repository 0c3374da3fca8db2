//! Cache-aside getter with request coalescing.
//!
//! This module implements the read / fetch / write-back protocol. Cache
//! layer failures never reach the caller: an unreadable store is a miss, a
//! malformed entry is deleted and treated as a miss, and a failed write-back
//! only costs a future hit. The only error a caller can observe is the one
//! its own fetch returned.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use coalesce_core::{
    CacheKey, CacheTtl, CoalesceError, CoalesceResult, ConfigError, ValidationError,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::codec::{JsonCodec, ValueCodec};
use crate::in_flight::{InFlightTable, Join};
use crate::stats::{GetterStats, StatsCounters};
use crate::traits::{CacheLogger, KeyValueStore};

/// Parameters for one [`CacheAsideGetter::get`] call.
///
/// `request_options` is handed to `fetch` unchanged; the getter never
/// inspects it.
pub struct CacheRequest<R, F> {
    cache_key: CacheKey,
    cache_ttl: CacheTtl,
    fetch: F,
    request_options: R,
}

impl<R, F> CacheRequest<R, F> {
    pub fn new(cache_key: CacheKey, cache_ttl: CacheTtl, request_options: R, fetch: F) -> Self {
        Self {
            cache_key,
            cache_ttl,
            fetch,
            request_options,
        }
    }

    /// Validate a raw key and TTL and build the request.
    pub fn try_new(
        cache_key: impl Into<String>,
        cache_ttl_secs: u64,
        request_options: R,
        fetch: F,
    ) -> Result<Self, ValidationError> {
        Ok(Self::new(
            CacheKey::new(cache_key)?,
            CacheTtl::from_secs(cache_ttl_secs)?,
            request_options,
            fetch,
        ))
    }
}

/// Read-through, write-through getter for one cache namespace.
///
/// For any key, at most one fetch runs at a time across every caller of
/// this getter (and its clones). Callers that miss while a fetch is running
/// wait for it and receive a clone of its outcome.
///
/// # Type Parameters
///
/// - `V`: The cached value type
/// - `E`: The error type returned by fetches
/// - `C`: The codec turning `V` into stored bytes
///
/// # Example
///
/// ```ignore
/// let getter: CacheAsideGetter<Profile, ApiError> =
///     CacheAsideGetter::new(store, Arc::new(TracingLogger));
///
/// let request = CacheRequest::try_new("profile:42", 300, profile_id, |id| async move {
///     api.fetch_profile(id).await
/// })?;
/// let profile = getter.get(request).await?;
/// ```
pub struct CacheAsideGetter<V, E, C = JsonCodec> {
    store: Arc<dyn KeyValueStore>,
    logger: Arc<dyn CacheLogger>,
    codec: Arc<C>,
    in_flight: Arc<InFlightTable<Result<V, E>>>,
    stats: Arc<StatsCounters>,
}

impl<V, E> CacheAsideGetter<V, E, JsonCodec> {
    /// Create a getter with the default JSON codec.
    pub fn new(store: Arc<dyn KeyValueStore>, logger: Arc<dyn CacheLogger>) -> Self {
        Self::from_parts(store, logger, JsonCodec)
    }

    /// Start building a getter; `store` and `logger` are required.
    pub fn builder() -> CacheAsideBuilder<V, E, JsonCodec> {
        CacheAsideBuilder::new()
    }
}

impl<V, E, C> CacheAsideGetter<V, E, C> {
    fn from_parts(store: Arc<dyn KeyValueStore>, logger: Arc<dyn CacheLogger>, codec: C) -> Self {
        Self {
            store,
            logger,
            codec: Arc::new(codec),
            in_flight: Arc::new(InFlightTable::new()),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// Snapshot of this getter's counters.
    pub fn stats(&self) -> GetterStats {
        self.stats.snapshot()
    }

    /// Number of keys with a fetch currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }
}

impl<V, E, C> CacheAsideGetter<V, E, C>
where
    V: Serialize + DeserializeOwned + PartialEq + Clone,
    E: Clone,
    C: ValueCodec,
{
    /// Return the cached value for the request's key, fetching and storing
    /// it on a miss.
    ///
    /// # Returns
    ///
    /// The decoded stored value on a hit. On a miss, the outcome of the one
    /// fetch running for this key: either this call's own `fetch` or one
    /// already started by another caller. Store and codec failures are
    /// logged and absorbed; the only error returned is a fetch error.
    pub async fn get<R, F, Fut>(&self, request: CacheRequest<R, F>) -> Result<V, E>
    where
        F: FnOnce(R) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let CacheRequest {
            cache_key,
            cache_ttl,
            fetch,
            request_options,
        } = request;
        let key = cache_key.as_str();

        if let Some(value) = self.read_cached(key).await {
            self.stats.record_hit();
            tracing::debug!(key, "cache hit");
            return Ok(value);
        }
        self.stats.record_miss();

        loop {
            match self.in_flight.join(key) {
                Join::Leader(guard) => {
                    self.stats.record_fetch();
                    tracing::debug!(key, "cache miss, fetching");

                    let outcome = fetch(request_options).await;
                    match &outcome {
                        Ok(value) => self.write_back(key, value, cache_ttl).await,
                        Err(_) => self.stats.record_fetch_error(),
                    }

                    let notified = guard.complete(&outcome);
                    if notified > 0 {
                        tracing::debug!(key, waiters = notified, "delivered fetch outcome");
                    }
                    return outcome;
                }
                Join::Waiter(rx) => {
                    self.stats.record_coalesced();
                    tracing::debug!(key, "joining in-flight fetch");
                    match rx.await {
                        Ok(outcome) => return outcome,
                        // The leader was dropped before finishing. It may
                        // have stored its value first, so look again before
                        // electing a new one.
                        Err(_) => {
                            if let Some(value) = self.read_cached(key).await {
                                tracing::debug!(key, "abandoned fetch left a cached value");
                                return Ok(value);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Read and decode the stored value. Every failure is logged and
    /// reported as a miss.
    async fn read_cached(&self, key: &str) -> Option<V> {
        match self.load(key).await {
            Ok(value) => value,
            Err(err @ CoalesceError::Codec(_)) => {
                self.stats.record_decode_error();
                self.logger.warn(
                    "Malformed data in cache, invalidating entry",
                    Some(&warning_context(key, &err)),
                );
                if let Err(err) = self.store.delete(key).await {
                    self.stats.record_store_error();
                    self.logger.warn(
                        "Failed to delete malformed cache entry",
                        Some(&warning_context(key, &CoalesceError::from(err))),
                    );
                }
                None
            }
            Err(err) => {
                self.stats.record_store_error();
                self.logger.warn(
                    "Failed to read from cache, fetching fresh data",
                    Some(&warning_context(key, &err)),
                );
                None
            }
        }
    }

    async fn load(&self, key: &str) -> CoalesceResult<Option<V>> {
        match self.store.read(key).await? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Best-effort cache population after a successful fetch.
    async fn write_back(&self, key: &str, value: &V, ttl: CacheTtl) {
        match self.save(key, value, ttl).await {
            Ok(()) => {}
            Err(err @ CoalesceError::Codec(_)) => {
                self.logger.warn(
                    "Failed to encode fetched value, skipping cache write",
                    Some(&warning_context(key, &err)),
                );
            }
            Err(err) => {
                self.stats.record_store_error();
                let mut context = warning_context(key, &err);
                context["ttl_seconds"] = json!(ttl.as_secs());
                self.logger.warn("Failed to write to cache", Some(&context));
            }
        }
    }

    async fn save(&self, key: &str, value: &V, ttl: CacheTtl) -> CoalesceResult<()> {
        let bytes = self.codec.encode(value)?;
        self.store.write_with_expiry(key, &bytes, ttl).await?;
        Ok(())
    }
}

/// Structured context attached to every cache-layer warning.
fn warning_context(key: &str, err: &CoalesceError) -> Value {
    let mut context = json!({
        "key": key,
        "error": err.to_string(),
    });
    if let Some(operation) = err.store_operation() {
        context["operation"] = json!(operation.as_str());
    }
    context
}

impl<V, E, C> Clone for CacheAsideGetter<V, E, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            logger: Arc::clone(&self.logger),
            codec: Arc::clone(&self.codec),
            in_flight: Arc::clone(&self.in_flight),
            stats: Arc::clone(&self.stats),
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`CacheAsideGetter`].
///
/// `store` and `logger` are required; [`build`](Self::build) reports the
/// first one missing.
pub struct CacheAsideBuilder<V, E, C = JsonCodec> {
    store: Option<Arc<dyn KeyValueStore>>,
    logger: Option<Arc<dyn CacheLogger>>,
    codec: C,
    _marker: PhantomData<fn() -> (V, E)>,
}

impl<V, E> CacheAsideBuilder<V, E, JsonCodec> {
    pub fn new() -> Self {
        Self {
            store: None,
            logger: None,
            codec: JsonCodec,
            _marker: PhantomData,
        }
    }
}

impl<V, E> Default for CacheAsideBuilder<V, E, JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E, C> CacheAsideBuilder<V, E, C> {
    /// Set the key-value store.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the warning sink.
    pub fn with_logger(mut self, logger: Arc<dyn CacheLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Replace the codec used for stored values.
    pub fn with_codec<C2: ValueCodec>(self, codec: C2) -> CacheAsideBuilder<V, E, C2> {
        CacheAsideBuilder {
            store: self.store,
            logger: self.logger,
            codec,
            _marker: PhantomData,
        }
    }

    pub fn build(self) -> Result<CacheAsideGetter<V, E, C>, ConfigError> {
        let store = self.store.ok_or_else(|| ConfigError::MissingRequired {
            field: "store".to_string(),
        })?;
        let logger = self.logger.ok_or_else(|| ConfigError::MissingRequired {
            field: "logger".to_string(),
        })?;
        Ok(CacheAsideGetter::from_parts(store, logger, self.codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryStore;
    use async_trait::async_trait;
    use coalesce_core::{StoreError, StoreOperation, StoreResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::future::{ready, Ready};
    use std::sync::Mutex;
    use std::time::Duration;

    // Minimal logger that remembers messages
    #[derive(Default)]
    struct CapturingLogger {
        messages: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl CapturingLogger {
        fn messages(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|(m, _)| m.clone())
                .collect()
        }
    }

    impl CacheLogger for CapturingLogger {
        fn warn(&self, message: &str, context: Option<&Value>) {
            self.messages
                .lock()
                .unwrap()
                .push((message.to_string(), context.cloned()));
        }
    }

    // Store whose every operation fails
    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            Err(StoreError::unavailable(StoreOperation::Read, key, "down"))
        }

        async fn write_with_expiry(&self, key: &str, _bytes: &[u8], _ttl: CacheTtl) -> StoreResult<()> {
            Err(StoreError::unavailable(StoreOperation::Write, key, "down"))
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            Err(StoreError::unavailable(StoreOperation::Delete, key, "down"))
        }
    }

    fn request(
        key: &str,
        calls: &Arc<AtomicUsize>,
        value: Value,
    ) -> CacheRequest<(), impl FnOnce(()) -> Ready<Result<Value, String>>> {
        let calls = Arc::clone(calls);
        CacheRequest::try_new(key, 60, (), move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            ready(Ok(value))
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores() {
        let store = Arc::new(InMemoryStore::new());
        let logger = Arc::new(CapturingLogger::default());
        let getter: CacheAsideGetter<Value, String> = CacheAsideGetter::new(store.clone(), logger.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let value = getter.get(request("k", &calls, json!({"a": 1}))).await.unwrap();

        assert_eq!(value, json!({"a": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.read("k").await.unwrap().is_some());
        assert!(logger.messages().is_empty());
        assert_eq!(getter.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_hit_skips_fetch() {
        let store = Arc::new(InMemoryStore::new());
        let getter: CacheAsideGetter<Value, String> =
            CacheAsideGetter::new(store, Arc::new(CapturingLogger::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        getter.get(request("k", &calls, json!(1))).await.unwrap();
        let second = getter.get(request("k", &calls, json!(2))).await.unwrap();

        assert_eq!(second, json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = getter.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fetches, 1);
    }

    #[tokio::test]
    async fn test_down_store_still_returns_fetch_result() {
        let logger = Arc::new(CapturingLogger::default());
        let getter: CacheAsideGetter<Value, String> =
            CacheAsideGetter::new(Arc::new(DownStore), logger.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let value = getter.get(request("k", &calls, json!("fresh"))).await.unwrap();

        assert_eq!(value, json!("fresh"));
        let messages = logger.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("read"));
        assert!(messages[1].contains("write"));
        assert_eq!(getter.stats().store_errors, 2);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_deleted_and_refetched() {
        let store = Arc::new(InMemoryStore::new());
        let ttl = CacheTtl::from_secs(60).unwrap();
        store.write_with_expiry("k", b"{not json", ttl).await.unwrap();
        let logger = Arc::new(CapturingLogger::default());
        let getter: CacheAsideGetter<Value, String> = CacheAsideGetter::new(store.clone(), logger.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let value = getter.get(request("k", &calls, json!({"ok": true}))).await.unwrap();

        assert_eq!(value, json!({"ok": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(logger.messages().len(), 1);
        assert!(logger.messages()[0].contains("Malformed"));
        let stored = store.read("k").await.unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&stored).unwrap(), json!({"ok": true}));
        assert_eq!(getter.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let store = Arc::new(InMemoryStore::new());
        let getter: CacheAsideGetter<Value, String> =
            CacheAsideGetter::new(store.clone(), Arc::new(CapturingLogger::default()));

        let failing = CacheRequest::try_new("k", 60, (), |_| async { Err::<Value, _>("boom".to_string()) })
            .unwrap();
        assert_eq!(getter.get(failing).await, Err("boom".to_string()));

        assert!(store.is_empty());
        assert_eq!(getter.stats().fetch_errors, 1);
        assert!(!getter.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_request_options_pass_through() {
        let getter: CacheAsideGetter<Value, String> = CacheAsideGetter::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(CapturingLogger::default()),
        );
        let request = CacheRequest::try_new("k", 60, ("user", 42u32), |(kind, id)| async move {
            Ok::<_, String>(json!({"kind": kind, "id": id}))
        })
        .unwrap();

        assert_eq!(getter.get(request).await.unwrap(), json!({"kind": "user", "id": 42}));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let getter: CacheAsideGetter<Value, String> = CacheAsideGetter::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(CapturingLogger::default()),
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |calls: Arc<AtomicUsize>| {
            CacheRequest::try_new("shared", 60, (), move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(json!("once"))
            })
            .unwrap()
        };

        let (a, b) = tokio::join!(
            getter.get(slow(Arc::clone(&calls))),
            getter.get(slow(Arc::clone(&calls)))
        );

        assert_eq!(a.unwrap(), json!("once"));
        assert_eq!(b.unwrap(), json!("once"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(getter.stats().coalesced, 1);
    }

    #[test]
    fn test_builder_requires_store_and_logger() {
        let err = CacheAsideGetter::<Value, String>::builder()
            .with_logger(Arc::new(CapturingLogger::default()))
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "store".to_string()
            }
        );

        let err = CacheAsideGetter::<Value, String>::builder()
            .with_store(Arc::new(InMemoryStore::new()))
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "logger".to_string()
            }
        );

        assert!(CacheAsideGetter::<Value, String>::builder()
            .with_store(Arc::new(InMemoryStore::new()))
            .with_logger(Arc::new(CapturingLogger::default()))
            .build()
            .is_ok());
    }

    // Codec that stores every value as an empty payload
    struct BlankCodec;

    impl ValueCodec for BlankCodec {
        fn encode<T>(&self, _value: &T) -> Result<Vec<u8>, coalesce_core::CodecError>
        where
            T: Serialize + DeserializeOwned + PartialEq,
        {
            Ok(Vec::new())
        }

        fn decode<T: DeserializeOwned>(&self, _bytes: &[u8]) -> Result<T, coalesce_core::CodecError> {
            Err(coalesce_core::CodecError::decode("blank"))
        }
    }

    #[tokio::test]
    async fn test_builder_with_custom_codec() {
        let store = Arc::new(InMemoryStore::new());
        let getter = CacheAsideGetter::<Value, String>::builder()
            .with_store(store.clone())
            .with_logger(Arc::new(CapturingLogger::default()))
            .with_codec(BlankCodec)
            .build()
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        getter.get(request("k", &calls, json!(1))).await.unwrap();

        assert_eq!(store.read("k").await.unwrap(), Some(Vec::new()));
    }
}
