//! File and directory sources with live reloading via `notify`.
//!
//! A file source emits one fragment per file, keyed by its full path and
//! tagged with its extension as the format. Hidden files in a directory
//! source are skipped.

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use strata_types::{ConfigError, Fragment, Source, Watcher, error::Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A [`Source`] reading one file, or every visible file in a directory.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Source for FileSource {
    async fn load(&self) -> Result<Vec<Fragment>> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|source| io_error(&self.path, source))?;
        if !meta.is_dir() {
            return Ok(vec![load_file(&self.path).await?]);
        }

        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|source| io_error(&self.path, source))?;
        let mut files = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&self.path, source))?
        {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            if entry.file_type().await.is_ok_and(|t| t.is_file()) {
                files.insert(path);
            }
        }

        let mut fragments = Vec::with_capacity(files.len());
        for path in files {
            fragments.push(load_file(&path).await?);
        }
        Ok(fragments)
    }

    async fn watch(&self) -> Result<Arc<dyn Watcher>> {
        Ok(Arc::new(FileWatcher::new(self.path.clone()).await?))
    }
}

/// Reads one file into a fragment.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read.
pub async fn load_file(path: &Path) -> Result<Fragment> {
    let value = tokio::fs::read(path)
        .await
        .map_err(|source| io_error(path, source))?;
    let format = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    Ok(Fragment::new(path.display().to_string(), value, format))
}

type EventReceiver = mpsc::UnboundedReceiver<notify::Result<notify::Event>>;

/// Watches the configured path and reloads whatever changed.
///
/// A single file is watched through its parent directory so editors that
/// replace the file on save keep producing events.
pub struct FileWatcher {
    path: PathBuf,
    is_dir: bool,
    events: tokio::sync::Mutex<EventReceiver>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    cancel: CancellationToken,
}

impl FileWatcher {
    /// Starts watching `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if `path` does not exist, or
    /// [`ConfigError::Watch`] if the OS watcher cannot be created.
    pub async fn new(path: PathBuf) -> Result<Self> {
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map_err(|source| io_error(&path, source))?
            .is_dir();
        let target = if is_dir {
            path.clone()
        } else {
            match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| ConfigError::Watch(e.to_string()))?;
        watcher
            .watch(&target, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Watch(format!("{}: {e}", target.display())))?;

        tracing::debug!(path = %path.display(), "watching config path");
        Ok(Self {
            path,
            is_dir,
            events: tokio::sync::Mutex::new(rx),
            watcher: Mutex::new(Some(watcher)),
            cancel: CancellationToken::new(),
        })
    }

    /// Folds every already-queued event into `paths`. Errors queued among
    /// them are logged and skipped; returns how many there were.
    fn drain_pending(&self, events: &mut EventReceiver, paths: &mut BTreeSet<PathBuf>) -> usize {
        let mut errors = 0;
        while let Ok(more) = events.try_recv() {
            match more {
                Ok(more) => self.affected(&more, paths),
                Err(e) => {
                    errors += 1;
                    tracing::warn!(path = %self.path.display(), error = %e, "file watcher reported an error");
                }
            }
        }
        errors
    }

    /// Maps event paths to the files this watcher is responsible for.
    fn affected(&self, event: &notify::Event, into: &mut BTreeSet<PathBuf>) {
        if matches!(event.kind, EventKind::Access(_) | EventKind::Remove(_)) {
            return;
        }
        for changed in &event.paths {
            if is_hidden(changed) {
                continue;
            }
            if self.is_dir {
                into.insert(changed.clone());
            } else if changed.file_name() == self.path.file_name() {
                into.insert(self.path.clone());
            }
        }
    }
}

#[async_trait]
impl Watcher for FileWatcher {
    async fn next(&self) -> Result<Vec<Fragment>> {
        let mut events = self.events.lock().await;
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ConfigError::Cancelled),
                event = events.recv() => match event {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => return Err(ConfigError::Watch(e.to_string())),
                    None => return Err(ConfigError::Cancelled),
                },
            };

            // Coalesce the burst of events a single save usually produces.
            let mut paths = BTreeSet::new();
            self.affected(&event, &mut paths);
            self.drain_pending(&mut events, &mut paths);

            let mut batch = Vec::with_capacity(paths.len());
            for path in paths {
                if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                    continue;
                }
                match load_file(&path).await {
                    Ok(fragment) => batch.push(fragment),
                    Err(ConfigError::Io { source, .. })
                        if source.kind() == std::io::ErrorKind::NotFound =>
                    {
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        // Dropping the OS watcher releases its handles and closes the channel.
        self.watcher.lock().take();
        tracing::info!(path = %self.path.display(), "stopped watching config path");
        Ok(())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}
