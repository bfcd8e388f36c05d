//! Built-in configuration sources.
//!
//! Each source implements [`strata_types::Source`]: an initial `load` plus a
//! `watch` stream of changed fragments.

pub mod env;
pub mod file;
pub mod memory;

pub use env::EnvSource;
pub use file::{FileSource, FileWatcher};
pub use memory::MemorySource;
