//! Traits shared across all strata crates.
//!
//! Every cross-crate abstraction is defined here so that sources and the
//! orchestrator depend only on `strata-types`, not on each other.

use crate::{Fragment, Value, error::Result};
use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;

/// Callback fired when a subscribed key changes without changing type.
///
/// Runs inline on the reconciling task; it must not block.
pub type Observer = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// A configuration origin: one bulk read plus an ongoing change stream.
#[async_trait]
pub trait Source: Send + Sync {
    /// Read every fragment the source currently holds.
    async fn load(&self) -> Result<Vec<Fragment>>;
    /// Open a change stream for this source.
    async fn watch(&self) -> Result<Arc<dyn Watcher>>;
}

/// A per-source change stream.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Wait for the next batch of changed fragments.
    ///
    /// Returns [`crate::ConfigError::Cancelled`] once [`Watcher::stop`] has
    /// been called, including for a call that was already blocked.
    async fn next(&self) -> Result<Vec<Fragment>>;
    /// Release the stream's resources.
    async fn stop(&self) -> Result<()>;
}

/// The merged key space built from every source's fragments.
///
/// Implementations serialize `merge`/`resolve` against lookups so a lookup
/// never observes a partially merged tree.
pub trait Reader: Send + Sync {
    /// Absorb fragments emitted by the source at position `source` in the
    /// configured order.
    ///
    /// Fragments from a higher `source` override lower ones on conflict,
    /// whatever order the merges arrive in. Within one source, a fragment
    /// replaces the previous fragment with the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if any fragment cannot be decoded; state is unchanged.
    fn merge(&self, source: usize, fragments: &[Fragment]) -> Result<()>;

    /// Expand cross-references over the merged tree. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::Resolve`] if resolution fails; the
    /// previously resolved tree stays visible.
    fn resolve(&self) -> Result<()>;

    /// Point lookup into the resolved tree.
    fn value(&self, key: &str) -> Option<Json>;

    /// Serialize the whole resolved tree as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::Serialization`] if encoding fails.
    fn source(&self) -> Result<Vec<u8>>;
}
