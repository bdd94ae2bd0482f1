//! Local storage layer
//!
//! ## Architecture
//!
//! - **KeyValueStore**: where raw values live (files in the data directory, or memory)
//! - **LocalStore**: the note document on top of it, read and written whole
//!
//! Malformed documents read as empty; only backend I/O failures are errors.

pub mod error;
pub mod local;
pub mod persistence;

pub use error::{StorageError, StorageResult};
pub use local::{sort_notes, LocalStore, StorageState, STORAGE_KEY, STORAGE_VERSION};
pub use persistence::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
