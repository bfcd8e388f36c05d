//! Environment variable source.

use async_trait::async_trait;
use figment::providers::Env;
use std::sync::Arc;
use strata_types::{ConfigError, Fragment, Source, Watcher, error::Result};
use tokio_util::sync::CancellationToken;

/// A [`Source`] reading prefixed environment variables.
///
/// `APP_LISTEN__PORT=8080` with prefix `APP_` becomes the plain fragment
/// `listen.port = "8080"`: the prefix is stripped, the rest is lowercased
/// and `__` separates nesting levels. The environment is read once per
/// `load`; the process environment has no change notification, so the
/// watcher only waits to be stopped.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefixes: Vec<String>,
}

impl EnvSource {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Current fragments, sorted by key within each prefix.
    ///
    /// When several prefixes map to the same key, the later prefix wins.
    #[must_use]
    pub fn fragments(&self) -> Vec<Fragment> {
        let mut out: Vec<Fragment> = Vec::new();
        for prefix in &self.prefixes {
            let mut found: Vec<Fragment> = Env::prefixed(prefix)
                .split("__")
                .iter()
                .filter(|(key, _)| !key.as_str().is_empty())
                .map(|(key, value)| Fragment::plain(key.as_str(), value))
                .collect();
            found.sort_by(|a, b| a.key.cmp(&b.key));
            for fragment in found {
                out.retain(|f| f.key != fragment.key);
                out.push(fragment);
            }
        }
        out
    }
}

#[async_trait]
impl Source for EnvSource {
    async fn load(&self) -> Result<Vec<Fragment>> {
        let fragments = self.fragments();
        tracing::debug!(count = fragments.len(), "loaded environment fragments");
        Ok(fragments)
    }

    async fn watch(&self) -> Result<Arc<dyn Watcher>> {
        Ok(Arc::new(EnvWatcher {
            cancel: CancellationToken::new(),
        }))
    }
}

struct EnvWatcher {
    cancel: CancellationToken,
}

#[async_trait]
impl Watcher for EnvWatcher {
    async fn next(&self) -> Result<Vec<Fragment>> {
        self.cancel.cancelled().await;
        Err(ConfigError::Cancelled)
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_prefixed_variables_become_plain_fragments() {
        Jail::expect_with(|jail| {
            jail.set_env("STRATA_TEST_LISTEN__PORT", 8080);
            jail.set_env("STRATA_TEST_LEVEL", "debug");
            jail.set_env("UNRELATED_LEVEL", "trace");

            let fragments = EnvSource::new(["STRATA_TEST_"]).fragments();
            assert_eq!(
                fragments,
                vec![
                    Fragment::plain("level", "debug"),
                    Fragment::plain("listen.port", "8080"),
                ]
            );
            Ok(())
        });
    }

    #[test]
    fn test_later_prefix_wins() {
        Jail::expect_with(|jail| {
            jail.set_env("STRATA_BASE_LEVEL", "info");
            jail.set_env("STRATA_OVER_LEVEL", "warn");

            let fragments = EnvSource::new(["STRATA_BASE_", "STRATA_OVER_"]).fragments();
            assert_eq!(fragments, vec![Fragment::plain("level", "warn")]);
            Ok(())
        });
    }

    #[test]
    fn test_no_prefixes_loads_nothing() {
        assert!(EnvSource::default().fragments().is_empty());
    }

    #[test]
    fn test_load_reads_current_environment() {
        Jail::expect_with(|jail| {
            jail.set_env("STRATA_LOAD_NAME", "strata");
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let fragments = rt
                .block_on(EnvSource::new(["STRATA_LOAD_"]).load())
                .unwrap();
            assert_eq!(fragments, vec![Fragment::plain("name", "strata")]);
            Ok(())
        });
    }

    #[tokio::test]
    async fn test_watcher_waits_for_stop() {
        let watcher = EnvSource::new(["STRATA_"]).watch().await.unwrap();
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), watcher.next()).await;
        assert!(pending.is_err());
        watcher.stop().await.unwrap();
        assert!(watcher.next().await.unwrap_err().is_cancelled());
    }
}
