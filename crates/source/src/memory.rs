//! In-memory source backed by a `Vec` behind a `Mutex`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_types::{ConfigError, Fragment, Source, Watcher, error::Result};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Pending batches a watcher may fall behind by before it resyncs.
const CHANGE_CAPACITY: usize = 64;

struct Inner {
    fragments: Mutex<Vec<Fragment>>,
    changes: broadcast::Sender<Vec<Fragment>>,
}

/// A [`Source`] whose fragments are set programmatically.
///
/// Clones share the same fragments and change stream, so a handle kept by
/// the caller can publish updates after the source was handed to a config.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<Inner>,
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fragments(Vec::new())
    }

    /// Creates a source holding `fragments`.
    #[must_use]
    pub fn with_fragments(fragments: Vec<Fragment>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                fragments: Mutex::new(fragments),
                changes,
            }),
        }
    }

    /// Sets (or overwrites) one fragment and publishes it.
    pub fn set(&self, fragment: Fragment) {
        self.publish(vec![fragment]);
    }

    /// Sets several fragments and publishes them as one batch.
    pub fn publish(&self, batch: Vec<Fragment>) {
        {
            let mut fragments = self.inner.fragments.lock();
            for fragment in &batch {
                if let Some(i) = fragments.iter().position(|f| f.key == fragment.key) {
                    fragments[i] = fragment.clone();
                } else {
                    fragments.push(fragment.clone());
                }
            }
        }
        // No active watchers is fine; the next `load` sees the new state.
        let _ = self.inner.changes.send(batch);
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn load(&self) -> Result<Vec<Fragment>> {
        Ok(self.inner.fragments.lock().clone())
    }

    async fn watch(&self) -> Result<Arc<dyn Watcher>> {
        Ok(Arc::new(MemoryWatcher {
            inner: Arc::clone(&self.inner),
            changes: tokio::sync::Mutex::new(self.inner.changes.subscribe()),
            cancel: CancellationToken::new(),
        }))
    }
}

/// Follows a [`MemorySource`]'s change stream.
///
/// A watcher that falls more than the channel capacity behind discards the
/// backlog and reports every current fragment as one batch, so no update is
/// lost.
struct MemoryWatcher {
    inner: Arc<Inner>,
    changes: tokio::sync::Mutex<broadcast::Receiver<Vec<Fragment>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Watcher for MemoryWatcher {
    async fn next(&self) -> Result<Vec<Fragment>> {
        let mut changes = self.changes.lock().await;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ConfigError::Cancelled),
            batch = changes.recv() => match batch {
                Ok(batch) => Ok(batch),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "memory watcher lagged, resending all fragments");
                    // Drain first: anything published after this point is
                    // also in the snapshot, so replaying it is harmless.
                    loop {
                        match changes.try_recv() {
                            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                            Err(_) => break,
                        }
                    }
                    Ok(self.inner.fragments.lock().clone())
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.cancel.cancelled().await;
                    Err(ConfigError::Cancelled)
                }
            },
        }
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_load_initial_fragments() {
        let source = MemorySource::with_fragments(vec![Fragment::plain("level", "info")]);
        let loaded = source.load().await.unwrap();
        assert_eq!(loaded, vec![Fragment::plain("level", "info")]);
    }

    #[tokio::test]
    async fn test_load_empty() {
        assert!(MemorySource::new().load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_overwrites_and_publishes() {
        let source = MemorySource::with_fragments(vec![Fragment::plain("level", "info")]);
        let watcher = source.watch().await.unwrap();
        let handle = source.clone();
        handle.set(Fragment::plain("level", "debug"));

        let batch = watcher.next().await.unwrap();
        assert_eq!(batch, vec![Fragment::plain("level", "debug")]);
        assert_eq!(
            source.load().await.unwrap(),
            vec![Fragment::plain("level", "debug")]
        );
    }

    #[tokio::test]
    async fn test_publish_batch_appends_new_keys() {
        let source = MemorySource::new();
        let watcher = source.watch().await.unwrap();
        source.publish(vec![Fragment::plain("a", "1"), Fragment::plain("b", "2")]);
        assert_eq!(watcher.next().await.unwrap().len(), 2);
        assert_eq!(source.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_unblocks_pending_next() {
        let source = MemorySource::new();
        let watcher = source.watch().await.unwrap();
        let waiting = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.next().await })
        };
        tokio::task::yield_now().await;
        watcher.stop().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ConfigError::Cancelled)));
        assert!(watcher.next().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_lagging_watcher_resends_every_fragment() {
        let source = MemorySource::new();
        let watcher = source.watch().await.unwrap();
        for i in 0..=CHANGE_CAPACITY {
            source.set(Fragment::plain(format!("k{i}"), "v"));
        }

        let batch = watcher.next().await.unwrap();
        assert_eq!(batch.len(), CHANGE_CAPACITY + 1);
        assert_eq!(batch[0], Fragment::plain("k0", "v"));
        assert_eq!(batch[CHANGE_CAPACITY], Fragment::plain(format!("k{CHANGE_CAPACITY}"), "v"));

        // The stale backlog is gone; the stream carries on from here.
        let idle = tokio::time::timeout(Duration::from_millis(50), watcher.next()).await;
        assert!(idle.is_err());
        source.set(Fragment::plain("k0", "w"));
        assert_eq!(watcher.next().await.unwrap(), vec![Fragment::plain("k0", "w")]);
    }
}
