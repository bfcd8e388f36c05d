//! The configuration orchestrator.
//!
//! [`Config`] drives the initial load of every source, then keeps one
//! reconciliation task per source running until [`Config::close`]. Each task
//! merges the source's change batches into the reader, re-resolves, and
//! refreshes the read cache, notifying observers of type-stable changes.

use crate::{options::Options, reader::LayeredReader};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use strata_types::{
    ConfigError, Kind, Observer, Reader, Source, Value, Watcher, error::Result,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A destination for [`Config::scan`].
///
/// Implemented for every deserializable type; the target is overwritten
/// with the whole snapshot.
pub trait ScanTarget {
    /// Replaces `self` with `data` decoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialization`] if the snapshot does not fit.
    fn scan_from(&mut self, data: &[u8]) -> Result<()>;
}

impl<T: DeserializeOwned> ScanTarget for T {
    fn scan_from(&mut self, data: &[u8]) -> Result<()> {
        *self = serde_json::from_slice(data)?;
        Ok(())
    }
}

/// State shared between callers and the reconciliation tasks.
struct Shared {
    reader: Arc<dyn Reader>,
    cached: DashMap<String, Value>,
    observers: DashMap<String, Observer>,
    // Serializes cache refreshes so an older read never overwrites a newer one.
    syncing: Mutex<()>,
}

impl Shared {
    fn value(&self, key: &str) -> Value {
        if let Some(cached) = self.cached.get(key) {
            return cached.value().clone();
        }
        // A miss reads and caches under the sync lock, so a refresh running
        // concurrently cannot be overtaken by an older payload.
        let _guard = self.syncing.lock();
        match self.reader.value(key) {
            // `entry` keeps identity stable when two callers race on a miss.
            Some(payload) => self
                .cached
                .entry(key.to_string())
                .or_insert_with(|| Value::found(key, payload))
                .value()
                .clone(),
            None => Value::not_found(key),
        }
    }

    /// Refreshes every cached value from the reader and fires observers.
    ///
    /// A value is only updated when its kind is unchanged and its content
    /// differs; a kind change leaves the cached payload alone. Observers run
    /// after the refresh, outside the sync lock.
    fn sync_cache(&self) {
        let mut changed = Vec::new();
        {
            let _guard = self.syncing.lock();
            let entries: Vec<(String, Value)> = self
                .cached
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();

            for (key, cached) in entries {
                let (Some(fresh), Some(current)) = (self.reader.value(&key), cached.load()) else {
                    continue;
                };
                if Kind::of(&fresh) != Kind::of(&current) || fresh == *current {
                    continue;
                }
                if cached.store(fresh).is_ok() {
                    changed.push((key, cached));
                }
            }
        }

        for (key, cached) in changed {
            let observer = self.observers.get(&key).map(|o| Arc::clone(o.value()));
            if let Some(observer) = observer {
                tracing::debug!(key = %key, "notifying observer");
                observer(&key, &cached);
            }
        }
    }
}

/// Live, multi-source configuration.
///
/// ```no_run
/// # async fn demo() -> strata_types::error::Result<()> {
/// use std::sync::Arc;
/// use strata_config::{Config, Options};
/// use strata_source::FileSource;
///
/// let config = Config::new(
///     Options::new().with_source(Arc::new(FileSource::new("config/app.yaml"))),
/// );
/// config.load().await?;
/// let port = config.value("server.port").int()?;
/// config.watch("log.level", |key, value| {
///     println!("{key} changed to {:?}", value.load());
/// })?;
/// # let _ = port;
/// config.close().await
/// # }
/// ```
pub struct Config {
    sources: Vec<Arc<dyn Source>>,
    watch_backoff: Duration,
    shared: Arc<Shared>,
    watchers: Mutex<Vec<Arc<dyn Watcher>>>,
    tasks: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
    loaded: AtomicBool,
}

impl Config {
    /// Creates a config backed by the default [`LayeredReader`].
    #[must_use]
    pub fn new(options: Options) -> Self {
        let reader = Arc::new(LayeredReader::new(
            Arc::clone(&options.decoder),
            options.resolver(),
        ));
        Self::with_reader(options, reader)
    }

    /// Creates a config backed by any [`Reader`] implementation.
    ///
    /// The options' decoder and resolver are not used; the reader owns
    /// decoding and resolution.
    #[must_use]
    pub fn with_reader(options: Options, reader: Arc<dyn Reader>) -> Self {
        Self {
            sources: options.sources,
            watch_backoff: options.watch_backoff,
            shared: Arc::new(Shared {
                reader,
                cached: DashMap::new(),
                observers: DashMap::new(),
                syncing: Mutex::new(()),
            }),
            watchers: Mutex::new(Vec::new()),
            tasks: Mutex::new(JoinSet::new()),
            cancel: CancellationToken::new(),
            loaded: AtomicBool::new(false),
        }
    }

    /// Loads every source in order, starts watching each one, then resolves.
    ///
    /// Must be called from within a tokio runtime. A failure leaves whatever
    /// was merged before it in place; discard the instance and build a new
    /// one to recover.
    ///
    /// # Errors
    ///
    /// Returns the first source, merge, watch or resolve error, or
    /// [`ConfigError::AlreadyLoaded`] on a second call.
    pub async fn load(&self) -> Result<()> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(ConfigError::AlreadyLoaded);
        }

        for (index, source) in self.sources.iter().enumerate() {
            let fragments = source.load().await?;
            for fragment in &fragments {
                tracing::debug!(key = %fragment.key, format = %fragment.format, "config loaded");
            }
            if let Err(e) = self.shared.reader.merge(index, &fragments) {
                tracing::error!(error = %e, "failed to merge config source");
                return Err(e);
            }
            let watcher = match source.watch().await {
                Ok(w) => w,
                Err(e) => {
                    tracing::error!(error = %e, "failed to watch config source");
                    return Err(e);
                }
            };
            self.watchers.lock().push(Arc::clone(&watcher));
            self.tasks.lock().spawn(reconcile(
                Arc::clone(&self.shared),
                index,
                watcher,
                self.cancel.child_token(),
                self.watch_backoff,
            ));
        }

        if let Err(e) = self.shared.reader.resolve() {
            tracing::error!(error = %e, "failed to resolve config source");
            return Err(e);
        }
        Ok(())
    }

    /// Returns the value for `key`.
    ///
    /// The first hit is cached for the life of this config and later
    /// updates are stored into that same value. A miss returns an uncached
    /// [`Value::NotFound`].
    #[must_use]
    pub fn value(&self, key: &str) -> Value {
        self.shared.value(key)
    }

    /// Decodes one snapshot of the resolved tree into every target.
    ///
    /// # Errors
    ///
    /// Returns the reader's serialization error or the first decode error.
    pub fn scan(&self, targets: &mut [&mut dyn ScanTarget]) -> Result<()> {
        let data = self.shared.reader.source()?;
        for target in targets.iter_mut() {
            target.scan_from(&data)?;
        }
        Ok(())
    }

    /// Decodes the resolved tree into a new `T`.
    ///
    /// # Errors
    ///
    /// Returns the reader's serialization error or a decode error.
    pub fn scan_as<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.shared.reader.source()?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Registers `observer` for `key`, replacing any previous one.
    ///
    /// The key must currently hold a non-null value; this is checked once,
    /// at registration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the key does not resolve.
    pub fn watch<F>(&self, key: &str, observer: F) -> Result<()>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        match self.value(key).load() {
            Some(payload) if !payload.is_null() => {}
            _ => return Err(ConfigError::NotFound(key.to_string())),
        }
        self.shared
            .observers
            .insert(key.to_string(), Arc::new(observer));
        Ok(())
    }

    /// Stops every watcher and waits for the reconciliation tasks to exit.
    ///
    /// Every watcher is asked to stop even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first watcher stop error; later ones are logged.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();

        let watchers = std::mem::take(&mut *self.watchers.lock());
        let mut first_err = None;
        for watcher in watchers {
            if let Err(e) = watcher.stop().await {
                tracing::error!(error = %e, "failed to stop watcher");
                first_err.get_or_insert(e);
            }
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "reconciliation task failed");
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}

/// One source's reconciliation loop.
async fn reconcile(
    shared: Arc<Shared>,
    index: usize,
    watcher: Arc<dyn Watcher>,
    cancel: CancellationToken,
    backoff: Duration,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(source = index, "config closed, watcher loop exiting");
                return;
            }
            next = watcher.next() => next,
        };

        let fragments = match next {
            Ok(fragments) => fragments,
            Err(e) if e.is_cancelled() => {
                tracing::info!(source = index, "watcher cancelled");
                return;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(source = index, error = %e, "failed to watch next config, retrying");
                } else {
                    tracing::error!(source = index, error = %e, "watcher returned a non-retryable error");
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(backoff) => continue,
                }
            }
        };

        if let Err(e) = shared.reader.merge(index, &fragments) {
            tracing::error!(source = index, error = %e, "failed to merge next config");
            continue;
        }
        if let Err(e) = shared.reader.resolve() {
            tracing::error!(source = index, error = %e, "failed to resolve next config");
            continue;
        }
        shared.sync_cache();
    }
}
