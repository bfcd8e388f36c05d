//! Raw configuration fragments emitted by sources.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One immutable unit of raw configuration data, pending merge.
///
/// `key` identifies the fragment within the reader (a file path, an
/// environment variable, a remote key) and `format` names the codec used to
/// decode `value`. An empty format means `value` is a plain string leaf
/// addressed by `key` itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub key: String,
    pub value: Vec<u8>,
    #[serde(default)]
    pub format: String,
}

impl Fragment {
    /// Creates a fragment with an explicit format.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>, format: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            format: format.into(),
        }
    }

    /// Creates a format-less fragment holding a single string leaf.
    pub fn plain(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(key, value, "")
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.format.is_empty() {
            write!(f, "{} ({} bytes)", self.key, self.value.len())
        } else {
            write!(f, "{} [{}] ({} bytes)", self.key, self.format, self.value.len())
        }
    }
}
