//! Core types and traits for the strata workspace.
//!
//! This crate defines the shared abstractions used by the orchestrator and
//! every configuration source: the error type, raw fragments, resolved
//! values, and the `Source`/`Watcher`/`Reader` seams.

pub mod error;
pub mod fragment;
pub mod traits;
pub mod value;

pub use error::ConfigError;
pub use fragment::Fragment;
pub use traits::{Observer, Reader, Source, Watcher};
pub use value::{Kind, Value};
