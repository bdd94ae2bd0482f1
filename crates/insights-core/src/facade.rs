//! Sync façade
//!
//! `SyncStore` is the single entry point for note operations. It routes every
//! call to the backend bound to the current identity: the local document while
//! signed out, the owner's cloud notes while signed in.
//!
//! ## Binding
//!
//! ```text
//! Anonymous --identity--> Authenticating --local notes--> Migrating --> CloudBound{uid}
//!                              |                                           ^
//!                              +------------- nothing local ---------------+
//! CloudBound --sign-out--> Anonymous
//! ```
//!
//! Identity changes reach the store through the cloud adapter's auth
//! listener; `next_identity` applies them in the order they were seen.
//! Backups always read and write the local document.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backup::{self, Backup, BackupError};
use crate::cloud::{CloudAdapter, CloudError, MigrationOutcome, Subscription, User};
use crate::config::Config;
use crate::models::{Language, Note, NoteDraft, NotePatch};
use crate::search;
use crate::storage::{LocalStore, StorageError};

/// Errors from façade operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("Note not found: {0}")]
    NoteNotFound(Uuid),
}

impl SyncError {
    /// The local storage failure behind this error, if any
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            SyncError::Storage(e)
            | SyncError::Cloud(CloudError::Storage(e))
            | SyncError::Backup(BackupError::Storage(e)) => Some(e),
            _ => None,
        }
    }
}

fn not_found_storage(error: StorageError) -> SyncError {
    match error {
        StorageError::NoteNotFound(id) => SyncError::NoteNotFound(id),
        other => SyncError::Storage(other),
    }
}

fn not_found_cloud(error: CloudError) -> SyncError {
    match error {
        CloudError::NoteNotFound(id) => SyncError::NoteNotFound(id),
        other => SyncError::Cloud(other),
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Callback receiving full note lists
pub type NotesCallback = Arc<dyn Fn(SyncResult<Vec<Note>>) + Send + Sync>;

/// Where note operations currently go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BindingState {
    #[default]
    Anonymous,
    Authenticating,
    Migrating,
    CloudBound { uid: String },
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingState::Anonymous => write!(f, "local"),
            BindingState::Authenticating => write!(f, "authenticating"),
            BindingState::Migrating => write!(f, "migrating"),
            BindingState::CloudBound { uid } => write!(f, "cloud ({})", uid),
        }
    }
}

/// A note collection the façade can route to
#[async_trait]
pub trait NoteBackend: Send + Sync {
    /// Short name for logs and status output
    fn name(&self) -> &'static str;

    async fn create(&self, draft: NoteDraft) -> SyncResult<Note>;

    /// Apply a patch; fails with `SyncError::NoteNotFound` for unknown IDs
    async fn update(&self, id: Uuid, patch: &NotePatch) -> SyncResult<()>;

    /// Remove a note; unknown IDs are not an error
    async fn delete(&self, id: Uuid) -> SyncResult<()>;

    /// Notes in display order
    async fn list(&self) -> SyncResult<Vec<Note>>;

    /// Make the given sequence the manual order
    async fn reorder(&self, notes: &[Note]) -> SyncResult<()>;

    /// Deliver the note list now and, where supported, on every change
    fn subscribe(&self, callback: NotesCallback) -> Subscription;
}

/// Notes stored on this device
pub struct LocalBackend {
    store: LocalStore,
}

impl LocalBackend {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NoteBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create(&self, draft: NoteDraft) -> SyncResult<Note> {
        Ok(self.store.create(draft)?)
    }

    async fn update(&self, id: Uuid, patch: &NotePatch) -> SyncResult<()> {
        self.store.update(id, patch).map_err(not_found_storage)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> SyncResult<()> {
        if !self.store.delete(id)? {
            debug!("Delete of unknown local note {} ignored", id);
        }
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<Note>> {
        Ok(self.store.list()?)
    }

    async fn reorder(&self, notes: &[Note]) -> SyncResult<()> {
        let ids: Vec<Uuid> = notes.iter().map(|n| n.id).collect();
        Ok(self.store.reorder(&ids)?)
    }

    /// The local document has no change feed: one immediate delivery
    fn subscribe(&self, callback: NotesCallback) -> Subscription {
        callback(self.store.list().map_err(SyncError::from));
        Subscription::inert()
    }
}

/// Cloud notes of one owner
pub struct CloudNotes {
    cloud: CloudAdapter,
    uid: String,
}

impl CloudNotes {
    pub fn new(cloud: CloudAdapter, uid: impl Into<String>) -> Self {
        Self {
            cloud,
            uid: uid.into(),
        }
    }
}

#[async_trait]
impl NoteBackend for CloudNotes {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn create(&self, draft: NoteDraft) -> SyncResult<Note> {
        Ok(self.cloud.create(draft, &self.uid).await?)
    }

    async fn update(&self, id: Uuid, patch: &NotePatch) -> SyncResult<()> {
        if patch.is_empty() {
            let known = self.list().await?.iter().any(|n| n.id == id);
            return if known {
                Ok(())
            } else {
                Err(SyncError::NoteNotFound(id))
            };
        }
        self.cloud.update(id, patch).await.map_err(not_found_cloud)
    }

    async fn delete(&self, id: Uuid) -> SyncResult<()> {
        Ok(self.cloud.delete(id).await?)
    }

    async fn list(&self) -> SyncResult<Vec<Note>> {
        Ok(self.cloud.fetch_notes(&self.uid).await?)
    }

    async fn reorder(&self, notes: &[Note]) -> SyncResult<()> {
        Ok(self.cloud.reorder(notes).await?)
    }

    fn subscribe(&self, callback: NotesCallback) -> Subscription {
        self.cloud
            .subscribe(&self.uid, move |result| callback(result.map_err(SyncError::from)))
    }
}

/// Identity-aware note store
pub struct SyncStore {
    local: LocalStore,
    cloud: CloudAdapter,
    state: BindingState,
    backend: Box<dyn NoteBackend>,
    identities: mpsc::UnboundedReceiver<Option<User>>,
    _auth_watch: Subscription,
}

impl SyncStore {
    /// Start signed out, routed to the local document
    ///
    /// The store listens for identity changes right away; the current
    /// identity is the first one `next_identity` returns.
    pub fn new(local: LocalStore, cloud: CloudAdapter) -> Self {
        let backend = Box::new(LocalBackend::new(local.clone()));
        let (tx, identities) = mpsc::unbounded_channel();
        let auth_watch = cloud.on_auth_change(move |user| {
            let _ = tx.send(user);
        });
        Self {
            local,
            cloud,
            state: BindingState::Anonymous,
            backend,
            identities,
            _auth_watch: auth_watch,
        }
    }

    /// Build from configuration and bind to the saved session, if any
    ///
    /// An expired saved session is renewed first. A failed migration during
    /// the rebind is logged; the store is still bound and `migrate` can
    /// retry it.
    pub async fn open(config: &Config) -> Self {
        let cloud = CloudAdapter::from_config(config);
        if let Err(e) = cloud.revalidate().await {
            warn!("Could not renew the saved session: {}", e);
        }
        let mut store = Self::new(LocalStore::open(config), cloud);
        if let Err(e) = store.next_identity().await {
            warn!("Could not move local notes to the cloud: {}", e);
        }
        store
    }

    pub fn state(&self) -> &BindingState {
        &self.state
    }

    /// Owner the store is bound to
    pub fn user_id(&self) -> Option<&str> {
        match &self.state {
            BindingState::CloudBound { uid } => Some(uid),
            _ => None,
        }
    }

    /// Name of the backend currently receiving operations
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn cloud(&self) -> &CloudAdapter {
        &self.cloud
    }

    /// Wait for the next identity change and bind to it
    ///
    /// Changes that piled up meanwhile collapse into the latest one. Without
    /// a cloud there is never a change and this returns `Ok(None)` at once.
    pub async fn next_identity(&mut self) -> SyncResult<Option<MigrationOutcome>> {
        let Some(mut user) = self.identities.recv().await else {
            return Ok(None);
        };
        while let Ok(newer) = self.identities.try_recv() {
            user = newer;
        }
        self.apply_identity(user).await
    }

    /// React to an identity change
    ///
    /// Signing in moves any local notes to the cloud before binding. A failed
    /// move still binds to the cloud; the local notes stay for the next
    /// attempt and the error is returned.
    pub async fn apply_identity(
        &mut self,
        user: Option<User>,
    ) -> SyncResult<Option<MigrationOutcome>> {
        let Some(user) = user else {
            if self.state != BindingState::Anonymous {
                info!("Signed out, using local notes");
            }
            self.bind_local();
            return Ok(None);
        };

        if self.user_id() == Some(user.uid.as_str()) {
            return Ok(None);
        }

        let has_local_notes = !self.local.is_empty()?;
        self.state = BindingState::Authenticating;
        debug!("Binding to cloud notes of {}", user.uid);

        let mut outcome = None;
        let mut failure = None;
        if has_local_notes {
            self.state = BindingState::Migrating;
            match self.cloud.migrate(&user.uid, &self.local).await {
                Ok(done) => outcome = Some(done),
                Err(e) => {
                    warn!("Migration failed, local notes kept: {}", e);
                    failure = Some(e);
                }
            }
        }

        self.backend = Box::new(CloudNotes::new(self.cloud.clone(), user.uid.clone()));
        self.state = BindingState::CloudBound { uid: user.uid };

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(outcome),
        }
    }

    fn bind_local(&mut self) {
        self.backend = Box::new(LocalBackend::new(self.local.clone()));
        self.state = BindingState::Anonymous;
    }

    pub async fn create(&self, draft: NoteDraft) -> SyncResult<Note> {
        self.backend.create(draft).await
    }

    pub async fn update(&self, id: Uuid, patch: &NotePatch) -> SyncResult<()> {
        self.backend.update(id, patch).await
    }

    pub async fn delete(&self, id: Uuid) -> SyncResult<()> {
        self.backend.delete(id).await
    }

    pub async fn list(&self) -> SyncResult<Vec<Note>> {
        self.backend.list().await
    }

    /// Find a note by ID in the bound collection
    pub async fn get(&self, id: Uuid) -> SyncResult<Option<Note>> {
        Ok(self.list().await?.into_iter().find(|n| n.id == id))
    }

    /// Filter notes by title or content
    pub fn search(notes: &[Note], query: &str) -> Vec<Note> {
        search::search(notes, query)
    }

    pub async fn reorder(&self, notes: &[Note]) -> SyncResult<()> {
        self.backend.reorder(notes).await
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(SyncResult<Vec<Note>>) + Send + Sync + 'static,
    {
        self.backend.subscribe(Arc::new(callback))
    }

    /// Retry moving local notes to the bound owner
    pub async fn migrate(&self) -> SyncResult<MigrationOutcome> {
        let uid = self.user_id().ok_or(CloudError::NotSignedIn)?;
        Ok(self.cloud.migrate(uid, &self.local).await?)
    }

    pub fn export(&self) -> SyncResult<Backup> {
        Ok(backup::export(&self.local)?)
    }

    pub fn export_to_dir(&self, dir: &Path) -> SyncResult<PathBuf> {
        Ok(backup::export_to_dir(&self.local, dir)?)
    }

    /// Replace the local document with a backup; false if it was rejected
    pub fn import(&self, text: &str) -> bool {
        backup::import(&self.local, text)
    }

    pub fn import_file(&self, path: &Path) -> bool {
        backup::import_file(&self.local, path)
    }

    /// Language preference, kept on this device
    pub fn language(&self) -> SyncResult<Language> {
        Ok(self.local.language()?.unwrap_or_default())
    }

    pub fn set_language(&self, language: Language) -> SyncResult<()> {
        Ok(self.local.set_language(language)?)
    }
}
