//! Cloud storage
//!
//! ## Architecture
//!
//! - **CloudBackend**: the remote notes table, its change stream and the
//!   identity endpoints (`RestBackend` for the hosted service, `MemoryBackend`
//!   in-process)
//! - **CloudAdapter**: session handling and note operations on top of a backend,
//!   or an explicit "not configured" value when no endpoint is set
//! - **realtime**: Phoenix channel client driving the change stream
//!
//! Every failing call is logged and returned as a `CloudError`.

pub mod adapter;
pub mod auth;
pub mod backend;
pub mod memory;
pub mod realtime;
pub mod rest;

use thiserror::Error;
use uuid::Uuid;

use crate::models::ModelError;
use crate::storage::StorageError;

pub use adapter::{CloudAdapter, MigrationOutcome, Subscription};
pub use auth::{Session, SessionStore, SignInRequest, TokenGrant, User};
pub use backend::{ChangeEvent, ChangeFeed, ChangeKind, CloudBackend, OrderRow};
pub use memory::MemoryBackend;
pub use rest::RestBackend;

/// Errors from the cloud store
#[derive(Error, Debug)]
pub enum CloudError {
    /// No cloud endpoint or key configured
    #[error("Cloud storage is not configured. Set INSIGHTS_CLOUD_URL and INSIGHTS_CLOUD_KEY.")]
    NotConfigured,

    /// Operation needs a signed-in session
    #[error("Not signed in. Run 'insights login' first.")]
    NotSignedIn,

    /// The saved session can no longer be renewed; the user was signed out
    #[error("Session expired. Run 'insights login' again.")]
    SessionExpired,

    /// No row with this ID
    #[error("Note not found: {0}")]
    NoteNotFound(Uuid),

    /// The service answered with a non-success status
    #[error("Cloud request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    /// The request could not be sent or its response read
    #[error("Cloud request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Realtime channel failure
    #[error("Realtime channel error: {0}")]
    Realtime(String),

    /// Unexpected response body
    #[error("Unexpected cloud response: {0}")]
    Decode(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Invalid(#[from] ModelError),
}

impl CloudError {
    /// Whether the session token was rejected
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CloudError::Http { status: 401 | 403, .. })
    }

    /// Whether a refresh token was refused outright
    ///
    /// The identity service answers a bad grant with 400.
    pub fn is_rejected_grant(&self) -> bool {
        matches!(self, CloudError::Http { status: 400 | 401 | 403, .. })
    }
}

/// Result type for cloud operations
pub type CloudResult<T> = Result<T, CloudError>;
