//! Cloud store adapter
//!
//! Owns the signed-in session and exposes note operations against a
//! `CloudBackend`. When no cloud endpoint is configured the adapter is
//! `Unconfigured`: identity is always "signed out", every operation fails
//! with `CloudError::NotConfigured` and subscriptions are inert.
//!
//! An expired access token is renewed with the session's refresh token,
//! either ahead of time when the expiry is known or after the service
//! rejects it. A session that cannot be renewed is dropped, which signs
//! the user out.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{Session, SessionStore, SignInRequest, User};
use super::backend::{CloudBackend, OrderRow};
use super::rest::RestBackend;
use super::{CloudError, CloudResult};
use crate::config::{CloudSettings, Config};
use crate::models::{now_millis, Note, NoteDraft, NotePatch};
use crate::storage::LocalStore;

/// Handle to a running listener
///
/// Dropping the handle stops the listener; no callback fires afterwards.
#[derive(Debug, Default)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A handle with nothing behind it
    pub fn inert() -> Self {
        Self::default()
    }

    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Whether the listener is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Result of moving local notes to the cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigrationOutcome {
    /// Notes uploaded and removed from this device
    pub migrated: usize,
}

/// A configured cloud connection
pub struct CloudClient {
    backend: Arc<dyn CloudBackend>,
    settings: CloudSettings,
    sessions: SessionStore,
    session: watch::Sender<Option<Session>>,
    refreshing: Mutex<()>,
}

impl CloudClient {
    fn current(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    fn uid(&self) -> CloudResult<String> {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.user.uid.clone())
            .ok_or(CloudError::NotSignedIn)
    }

    /// Access token for the next request, renewed first if it has expired
    async fn token(&self) -> CloudResult<String> {
        let session = self.current().ok_or(CloudError::NotSignedIn)?;
        if session.is_expired(now_millis()) {
            debug!("Access token expired, refreshing");
            return self.refresh(&session.access_token).await;
        }
        Ok(session.access_token)
    }

    /// Replace `stale` with a fresh access token
    ///
    /// Concurrent callers holding the same stale token share one refresh.
    async fn refresh(&self, stale: &str) -> CloudResult<String> {
        let _guard = self.refreshing.lock().await;

        let session = self.current().ok_or(CloudError::NotSignedIn)?;
        if session.access_token != stale {
            return Ok(session.access_token);
        }
        let Some(refresh_token) = session.refresh_token.clone() else {
            self.expire("no refresh token");
            return Err(CloudError::SessionExpired);
        };

        match self.backend.refresh_session(&refresh_token).await {
            Ok(grant) => {
                let renewed = grant.into_session(Some(refresh_token), now_millis());
                if let Err(e) = self.sessions.save(&renewed) {
                    warn!("Could not save refreshed session: {}", e);
                }
                let token = renewed.access_token.clone();
                info!("Session refreshed for {}", renewed.user.uid);
                self.session.send_replace(Some(renewed));
                Ok(token)
            }
            Err(e) if e.is_rejected_grant() => {
                self.expire(&e.to_string());
                Err(CloudError::SessionExpired)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop a session that can no longer be renewed
    fn expire(&self, reason: &str) {
        warn!("Session expired ({}), signing out", reason);
        self.session.send_replace(None);
        if let Err(e) = self.sessions.clear() {
            warn!("Could not remove saved session: {}", e);
        }
    }

    /// Run an authenticated request, refreshing and retrying once on 401
    async fn call<T, F, Fut>(&self, operation: &str, request: F) -> CloudResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let token = logged(operation, self.token().await)?;
        let result = match request(token.clone()).await {
            Err(e) if e.is_unauthorized() => {
                debug!("Token rejected during {}, refreshing", operation);
                match self.refresh(&token).await {
                    Ok(fresh) => request(fresh).await,
                    Err(refresh_error) => Err(refresh_error),
                }
            }
            other => other,
        };
        logged(operation, result)
    }
}

/// Entry point for everything cloud related
#[derive(Clone)]
pub enum CloudAdapter {
    Unconfigured,
    Configured(Arc<CloudClient>),
}

/// Log a failed call before handing the error back
fn logged<T>(operation: &str, result: CloudResult<T>) -> CloudResult<T> {
    if let Err(ref e) = result {
        warn!("Cloud {} failed: {}", operation, e);
    }
    result
}

impl CloudAdapter {
    /// Build the adapter from configuration
    ///
    /// A previously saved session is restored from the data directory.
    pub fn from_config(config: &Config) -> Self {
        match config.cloud_settings() {
            Some(settings) => {
                let backend = Arc::new(RestBackend::new(&settings));
                Self::with_backend(backend, settings, SessionStore::new(config.session_path()))
            }
            None => {
                debug!("Cloud storage not configured");
                CloudAdapter::Unconfigured
            }
        }
    }

    /// Build the adapter over a specific backend
    pub fn with_backend(
        backend: Arc<dyn CloudBackend>,
        settings: CloudSettings,
        sessions: SessionStore,
    ) -> Self {
        let (session, _) = watch::channel(sessions.load());
        debug!("Cloud adapter using {} backend", backend.backend_tag());
        CloudAdapter::Configured(Arc::new(CloudClient {
            backend,
            settings,
            sessions,
            session,
            refreshing: Mutex::new(()),
        }))
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, CloudAdapter::Configured(_))
    }

    fn client(&self) -> CloudResult<&Arc<CloudClient>> {
        match self {
            CloudAdapter::Configured(client) => Ok(client),
            CloudAdapter::Unconfigured => Err(CloudError::NotConfigured),
        }
    }

    /// The signed-in user, if any
    pub fn current_user(&self) -> Option<User> {
        let client = self.client().ok()?;
        let session = client.session.borrow();
        session.as_ref().map(|s| s.user.clone())
    }

    /// Renew the saved session if its access token has expired
    ///
    /// A session that cannot be renewed is dropped. Without a session, or
    /// without a cloud, this does nothing.
    pub async fn revalidate(&self) -> CloudResult<()> {
        let Ok(client) = self.client() else {
            return Ok(());
        };
        if client.current().is_none() {
            return Ok(());
        }
        logged("session refresh", client.token().await).map(|_| ())
    }

    /// Start the OAuth flow
    ///
    /// Returns the URL the user has to visit; the token comes back through
    /// `complete_sign_in`.
    pub fn sign_in(&self) -> CloudResult<SignInRequest> {
        let client = self.client()?;
        let provider = client.settings.auth_provider.clone();
        let url = logged(
            "sign-in",
            client
                .backend
                .authorize_url(&provider, client.settings.redirect_url.as_deref()),
        )?;
        Ok(SignInRequest { provider, url })
    }

    /// Finish sign-in with the tokens from the provider redirect
    pub async fn complete_sign_in(
        &self,
        access_token: &str,
        refresh_token: Option<String>,
    ) -> CloudResult<User> {
        let client = self.client()?;
        let user = logged("sign-in", client.backend.fetch_user(access_token).await)?;

        let session = Session {
            access_token: access_token.to_string(),
            refresh_token,
            expires_at: None,
            user: user.clone(),
        };
        logged("sign-in", client.sessions.save(&session).map_err(CloudError::from))?;
        client.session.send_replace(Some(session));

        info!("Signed in as {}", user.uid);
        Ok(user)
    }

    /// Sign out, clearing the saved session
    ///
    /// The remote logout is best-effort; the local session is always cleared.
    pub async fn sign_out(&self) -> CloudResult<()> {
        let client = self.client()?;
        if let Some(session) = client.current() {
            if let Err(e) = client.backend.sign_out(&session.access_token).await {
                warn!("Remote sign-out failed, clearing session anyway: {}", e);
            }
        }

        client.session.send_replace(None);
        logged("sign-out", client.sessions.clear().map_err(CloudError::from))?;
        info!("Signed out");
        Ok(())
    }

    /// Watch the signed-in identity
    ///
    /// The callback runs right away with the current identity, then again on
    /// every sign-in, sign-out, token refresh and expiry.
    pub fn on_auth_change<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(Option<User>) + Send + 'static,
    {
        let Ok(client) = self.client() else {
            return Subscription::inert();
        };

        let mut rx = client.session.subscribe();
        callback(rx.borrow_and_update().as_ref().map(|s| s.user.clone()));

        Subscription::from_task(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let user = rx.borrow_and_update().as_ref().map(|s| s.user.clone());
                callback(user);
            }
        }))
    }

    /// Deliver the owner's notes now and after every remote change
    ///
    /// Each change triggers a full refetch. Refetches run one at a time, so
    /// deliveries arrive in the order the changes were seen.
    pub fn subscribe<F>(&self, owner: &str, callback: F) -> Subscription
    where
        F: Fn(CloudResult<Vec<Note>>) + Send + Sync + 'static,
    {
        let Ok(client) = self.client() else {
            return Subscription::inert();
        };
        if client.current().is_none() {
            callback(Err(CloudError::NotSignedIn));
            return Subscription::inert();
        }

        let client = client.clone();
        let owner = owner.to_string();

        Subscription::from_task(tokio::spawn(async move {
            let backend = &client.backend;
            let owner = owner.as_str();
            let fetch = |token: String| async move { backend.fetch_notes(&token, owner).await };

            // Open the feed before the first fetch so no change falls in between
            let feed = client
                .call("subscribe", |token: String| async move {
                    backend.changes(&token, owner).await
                })
                .await
                .ok();

            callback(client.call("fetch", fetch).await);

            let Some(mut feed) = feed else {
                return;
            };
            while let Some(event) = feed.next().await {
                debug!("Change {:?} for {}, refetching", event.kind, owner);
                callback(client.call("fetch", fetch).await);
            }
            debug!("Change feed for {} ended", owner);
        }))
    }

    /// One-off fetch of the owner's notes, ordered by `order`
    pub async fn fetch_notes(&self, owner: &str) -> CloudResult<Vec<Note>> {
        let client = self.client()?;
        let backend = &client.backend;
        client
            .call("fetch", |token: String| async move {
                backend.fetch_notes(&token, owner).await
            })
            .await
    }

    /// Create a note owned by `owner`
    pub async fn create(&self, draft: NoteDraft, owner: &str) -> CloudResult<Note> {
        let client = self.client()?;
        let backend = &client.backend;

        let mut note = Note::from_draft(draft)?;
        note.user_id = Some(owner.to_string());

        let row = std::slice::from_ref(&note);
        client
            .call("create", |token: String| async move {
                backend.insert_notes(&token, row).await
            })
            .await?;
        debug!("Created cloud note {}", note.id);
        Ok(note)
    }

    /// Write the patched columns and a fresh `updatedAt`
    ///
    /// Fails with `CloudError::NoteNotFound` when no row has this ID.
    pub async fn update(&self, id: Uuid, patch: &NotePatch) -> CloudResult<()> {
        let client = self.client()?;
        let backend = &client.backend;
        patch.validate()?;
        if patch.is_empty() {
            return Ok(());
        }

        let mut fields = patch.fields();
        fields.insert("updatedAt".into(), now_millis().timestamp_millis().into());
        let fields = &fields;
        client
            .call("update", |token: String| async move {
                backend.update_note(&token, id, fields.clone()).await
            })
            .await
    }

    pub async fn delete(&self, id: Uuid) -> CloudResult<()> {
        let client = self.client()?;
        let backend = &client.backend;
        client
            .call("delete", |token: String| async move {
                backend.delete_note(&token, id).await
            })
            .await
    }

    /// Persist the given sequence as the manual order, in one request
    pub async fn reorder(&self, notes: &[Note]) -> CloudResult<()> {
        let client = self.client()?;
        let backend = &client.backend;
        let uid = client.uid()?;
        let updated_at = now_millis().timestamp_millis();

        let rows: Vec<OrderRow> = notes
            .iter()
            .enumerate()
            .map(|(index, note)| OrderRow {
                id: note.id,
                order: index as i64,
                updated_at,
                user_id: uid.clone(),
            })
            .collect();
        let rows = rows.as_slice();
        client
            .call("reorder", |token: String| async move {
                backend.upsert_order(&token, rows).await
            })
            .await
    }

    /// Move every local note to the cloud under `owner`
    ///
    /// Notes keep their manual position; a note without one takes its index
    /// in the local document. Rows are upserted by ID, so a retry after a
    /// partial failure, or a note that is already in the cloud, never makes
    /// a duplicate. Local notes are cleared only after the upload succeeded.
    pub async fn migrate(&self, owner: &str, local: &LocalStore) -> CloudResult<MigrationOutcome> {
        let client = self.client()?;
        let backend = &client.backend;

        let notes = local.read()?.notes;
        if notes.is_empty() {
            return Ok(MigrationOutcome::default());
        }

        let tagged: Vec<Note> = notes
            .into_iter()
            .enumerate()
            .map(|(index, mut note)| {
                note.user_id = Some(owner.to_string());
                note.order = note.order.or(Some(index as i64));
                note
            })
            .collect();

        let rows = tagged.as_slice();
        client
            .call("migration", |token: String| async move {
                backend.upsert_notes(&token, rows).await
            })
            .await?;
        logged("migration", local.clear_notes().map_err(CloudError::from))?;

        info!("Migrated {} local notes to the cloud", tagged.len());
        Ok(MigrationOutcome {
            migrated: tagged.len(),
        })
    }
}
