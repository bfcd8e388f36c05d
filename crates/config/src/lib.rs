//! Live, multi-source configuration for strata.
//!
//! Sources are merged into one layered key space, placeholders are resolved,
//! and a reconciliation task per source keeps cached values current and
//! notifies observers as sources change.

pub mod config;
pub mod decoder;
pub mod options;
pub mod reader;
pub mod resolver;

pub use config::{Config, ScanTarget};
pub use decoder::{Decoder, default_decoder};
pub use options::{DEFAULT_WATCH_BACKOFF, Options};
pub use reader::LayeredReader;
pub use resolver::{Resolver, placeholder_resolver};
