//! Unified error type for the strata workspace.

use std::path::PathBuf;
use thiserror::Error;

/// Enumerates all error kinds that can occur across strata crates.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The key is absent from the resolved tree.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A value exists but cannot be converted to the requested type.
    #[error("type assert error: {key} is {actual}, expected {expected}")]
    TypeAssert {
        key: String,
        expected: &'static str,
        actual: crate::Kind,
    },

    /// The watcher was stopped; the only clean end of a change stream.
    #[error("watcher cancelled")]
    Cancelled,

    /// No codec is registered for the fragment's format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A fragment could not be decoded with its declared format.
    #[error("failed to decode {key} as {format}: {message}")]
    Decode {
        key: String,
        format: String,
        message: String,
    },

    /// Cross-reference resolution failed.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// A source failed to produce fragments.
    #[error("source error: {0}")]
    Source(String),

    /// Filesystem access failed.
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A change stream could not be set up or broke down.
    #[error("watch error: {0}")]
    Watch(String),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `load` was called more than once on the same instance.
    #[error("configuration already loaded")]
    AlreadyLoaded,

    /// `store` was called on a not-found value.
    #[error("value for {0} is read-only")]
    ReadOnly(String),
}

impl ConfigError {
    /// Returns `true` if this is the watcher cancellation signal.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if the error is likely transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source(_) | Self::Watch(_) | Self::Io { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ConfigError>;
