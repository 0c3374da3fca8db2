//! Coalesce Cache - Cache-Aside Getter
//!
//! Sits in front of an expensive fetch and an expiring key-value store.
//!
//! # Design Philosophy
//!
//! The cache is an optimisation, never a dependency. A store that is down,
//! slow to answer or full of garbage makes calls slower; it never makes
//! them fail. Callers only ever see the outcome of their own fetch.
//!
//! Concurrent misses on one key are coalesced: a single fetch runs and
//! every waiting caller receives a clone of its outcome.
//!
//! # Example
//!
//! ```ignore
//! use coalesce_cache::{CacheAsideGetter, CacheRequest, InMemoryStore, TracingLogger};
//!
//! let getter: CacheAsideGetter<serde_json::Value, String> =
//!     CacheAsideGetter::builder()
//!         .with_store(Arc::new(InMemoryStore::new()))
//!         .with_logger(Arc::new(TracingLogger))
//!         .build()?;
//!
//! let request = CacheRequest::try_new("fresh-data", 1000, (), |_| async {
//!     Ok(serde_json::json!({"hello": "world"}))
//! })?;
//! let value = getter.get(request).await?;
//! ```

pub mod codec;
pub mod getter;
mod in_flight;
pub mod logger;
pub mod memory_store;
pub mod stats;
pub mod traits;

pub use codec::{JsonCodec, ValueCodec};
pub use getter::{CacheAsideBuilder, CacheAsideGetter, CacheRequest};
pub use logger::TracingLogger;
pub use memory_store::InMemoryStore;
pub use stats::GetterStats;
pub use traits::{CacheLogger, KeyValueStore};

// Re-export core types so adapters only need this crate
pub use coalesce_core::{
    CacheKey, CacheTtl, CodecError, CoalesceError, CoalesceResult, ConfigError, StoreError,
    StoreOperation, StoreResult, ValidationError,
};
