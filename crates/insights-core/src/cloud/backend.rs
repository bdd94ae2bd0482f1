//! Remote table contract
//!
//! A `CloudBackend` is the notes table plus its change stream and the identity
//! endpoints. Calls carry the session's access token; the backend does not keep
//! any session state itself.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::auth::{TokenGrant, User};
use super::CloudResult;
use crate::models::Note;

/// Kind of a remote row change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The change stream reconnected and events may have been missed
    Resync,
}

/// A change notification from the remote table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: Option<Uuid>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, id: Option<Uuid>) -> Self {
        Self { kind, id }
    }
}

/// Stream of change events for one owner
///
/// Dropping the feed closes the underlying channel.
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Create a feed and the sender that drives it
    pub fn channel() -> (mpsc::UnboundedSender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Next event, `None` once the source has gone away
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

/// Row written by a bulk reorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRow {
    pub id: Uuid,
    pub order: i64,
    pub updated_at: i64,
    pub user_id: String,
}

/// Remote notes table, change stream and identity endpoints
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Short name for logs
    fn backend_tag(&self) -> &'static str;

    /// Provider URL that starts the OAuth sign-in flow
    fn authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> CloudResult<String>;

    /// Resolve the user behind an access token
    async fn fetch_user(&self, token: &str) -> CloudResult<User>;

    /// Trade a refresh token for a new access token
    async fn refresh_session(&self, refresh_token: &str) -> CloudResult<TokenGrant>;

    /// End the session on the provider side
    async fn sign_out(&self, token: &str) -> CloudResult<()>;

    /// All notes owned by `owner`, ordered by `order` ascending
    async fn fetch_notes(&self, token: &str, owner: &str) -> CloudResult<Vec<Note>>;

    /// Insert rows in one request; all or nothing
    async fn insert_notes(&self, token: &str, notes: &[Note]) -> CloudResult<()>;

    /// Insert rows, replacing any row with the same ID, in one request
    async fn upsert_notes(&self, token: &str, notes: &[Note]) -> CloudResult<()>;

    /// Set the given columns on the row with this ID
    ///
    /// Fails with `CloudError::NoteNotFound` when no row matched.
    async fn update_note(&self, token: &str, id: Uuid, fields: Map<String, Value>)
        -> CloudResult<()>;

    async fn delete_note(&self, token: &str, id: Uuid) -> CloudResult<()>;

    /// Upsert order positions matched by ID, in one request
    async fn upsert_order(&self, token: &str, rows: &[OrderRow]) -> CloudResult<()>;

    /// Open a change stream scoped to `owner`
    async fn changes(&self, token: &str, owner: &str) -> CloudResult<ChangeFeed>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_change_feed_ends_when_sender_dropped() {
        let (tx, mut feed) = ChangeFeed::channel();
        tx.send(ChangeEvent::new(ChangeKind::Insert, None)).unwrap();
        drop(tx);

        assert_eq!(
            feed.next().await,
            Some(ChangeEvent::new(ChangeKind::Insert, None))
        );
        assert_eq!(feed.next().await, None);
    }

    #[test]
    fn test_order_row_wire_format() {
        let row = OrderRow {
            id: Uuid::nil(),
            order: 3,
            updated_at: 1_700_000_000_000,
            user_id: "u".to_string(),
        };
        let value = serde_json::to_value(row).unwrap();
        assert_eq!(value["order"], 3);
        assert_eq!(value["updatedAt"], 1_700_000_000_000i64);
        assert_eq!(value["userId"], "u");
    }
}
