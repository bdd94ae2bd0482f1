//! Insights Core Library
//!
//! This crate provides the core functionality for Insights, sticky notes that
//! live on the device and move to the cloud once the user signs in.
//!
//! # Architecture
//!
//! - **Local store**: one JSON document holding every note, used while signed out
//! - **Cloud store**: the owner's rows in the hosted notes table, kept current
//!   through a realtime change channel
//! - **SyncStore**: routes every operation to whichever of the two the current
//!   identity selects, migrating local notes on sign-in
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = SyncStore::open(&config).await;
//!
//! // Add a note
//! let note = store.create(NoteDraft::new("Buy milk").with_title("Errands")).await?;
//!
//! // Query notes
//! let notes = store.list().await?;
//! let hits = SyncStore::search(&notes, "milk");
//! ```
//!
//! # Modules
//!
//! - `facade`: identity-aware note store (main entry point)
//! - `models`: notes, drafts, patches, colors and languages
//! - `storage`: local document persistence
//! - `cloud`: cloud backend, session handling and realtime changes
//! - `backup`: export and import of the local document
//! - `assist`: AI enhancement, summaries and speech
//! - `config`: Application configuration

pub mod assist;
pub mod backup;
pub mod cloud;
pub mod config;
pub mod facade;
pub mod models;
pub mod search;
pub mod storage;

pub use assist::{AssistError, Assistant, SpeechAudio};
pub use backup::{Backup, BackupError};
pub use cloud::{CloudAdapter, CloudError, MigrationOutcome, Subscription, User};
pub use config::Config;
pub use facade::{BindingState, NoteBackend, SyncError, SyncResult, SyncStore};
pub use models::{Language, Note, NoteColor, NoteDraft, NotePatch};
pub use storage::{LocalStore, StorageError};
