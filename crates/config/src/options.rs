//! Construction-time options for [`crate::Config`].

use crate::{
    decoder::{Decoder, default_decoder},
    resolver::{Resolver, placeholder_resolver},
};
use serde_json::{Map, Value as Json};
use std::{fmt, sync::Arc, time::Duration};
use strata_types::{Fragment, Source, error::Result};

/// Default pause after a watcher reports a transient error.
pub const DEFAULT_WATCH_BACKOFF: Duration = Duration::from_secs(1);

/// Sources, codec and resolver used by a [`crate::Config`].
///
/// Sources are merged in the order they are added; later sources take
/// precedence on conflicting keys.
pub struct Options {
    pub(crate) sources: Vec<Arc<dyn Source>>,
    pub(crate) decoder: Decoder,
    pub(crate) resolver: Option<Resolver>,
    pub(crate) resolve_actual_types: bool,
    pub(crate) watch_backoff: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            decoder: default_decoder(),
            resolver: None,
            resolve_actual_types: false,
            watch_backoff: DEFAULT_WATCH_BACKOFF,
        }
    }
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source; it overrides every source added before it.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    /// Replaces the fragment decoder.
    #[must_use]
    pub fn with_decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&Fragment, &mut Map<String, Json>) -> Result<()> + Send + Sync + 'static,
    {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Replaces the placeholder resolver.
    #[must_use]
    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&mut Json) -> Result<()> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Converts substituted placeholders to bool/int/float when they parse.
    /// Ignored when a custom resolver is set.
    #[must_use]
    pub fn with_resolve_actual_types(mut self, enabled: bool) -> Self {
        self.resolve_actual_types = enabled;
        self
    }

    /// Sets the pause after a transient watcher error.
    #[must_use]
    pub fn with_watch_backoff(mut self, backoff: Duration) -> Self {
        self.watch_backoff = backoff;
        self
    }

    pub(crate) fn resolver(&self) -> Resolver {
        self.resolver
            .clone()
            .unwrap_or_else(|| placeholder_resolver(self.resolve_actual_types))
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("sources", &self.sources.len())
            .field("custom_resolver", &self.resolver.is_some())
            .field("resolve_actual_types", &self.resolve_actual_types)
            .field("watch_backoff", &self.watch_backoff)
            .finish_non_exhaustive()
    }
}
