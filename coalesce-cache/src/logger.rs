//! `tracing`-backed logger.

use serde_json::Value;

use crate::traits::CacheLogger;

/// Forwards getter warnings to `tracing::warn!`.
///
/// The structured context is attached as a `context` field so JSON
/// subscribers keep it machine-readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl CacheLogger for TracingLogger {
    fn warn(&self, message: &str, context: Option<&Value>) {
        match context {
            Some(context) => tracing::warn!(context = %context, "{}", message),
            None => tracing::warn!("{}", message),
        }
    }
}
