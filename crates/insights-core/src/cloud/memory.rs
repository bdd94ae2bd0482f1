//! In-process cloud backend
//!
//! Holds the notes table in memory and notifies change feeds the way the
//! hosted service does. Used by tests and offline tooling; supports
//! injecting write failures and expiring tokens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::auth::{TokenGrant, User};
use super::backend::{ChangeEvent, ChangeFeed, ChangeKind, CloudBackend, OrderRow};
use super::{CloudError, CloudResult};
use crate::models::{Note, NoteColor};

#[derive(Default)]
struct Table {
    rows: Vec<Note>,
    users: HashMap<String, User>,
    /// Refresh token to the access token it renews into
    refresh_tokens: HashMap<String, String>,
    watchers: Vec<(String, mpsc::UnboundedSender<ChangeEvent>)>,
}

impl Table {
    fn notify(&mut self, owner: &str, event: ChangeEvent) {
        self.watchers.retain(|(watched, tx)| {
            if watched != owner {
                return !tx.is_closed();
            }
            tx.send(event.clone()).is_ok()
        });
    }
}

/// Cloud backend kept in memory
#[derive(Default)]
pub struct MemoryBackend {
    table: Mutex<Table>,
    fail_writes: AtomicBool,
    fetch_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user reachable with `token`
    pub fn add_user(&self, token: &str, user: User) {
        self.lock().users.insert(token.to_string(), user);
    }

    /// Let `refresh_token` renew into `access_token`
    ///
    /// The access token must belong to a user registered with `add_user`.
    pub fn add_refresh_token(&self, refresh_token: &str, access_token: &str) {
        self.lock()
            .refresh_tokens
            .insert(refresh_token.to_string(), access_token.to_string());
    }

    /// Stop accepting `token`, as if it had expired
    pub fn expire_token(&self, token: &str) {
        self.lock().users.remove(token);
    }

    /// Make every write fail with a service error until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `fetch_notes` calls served
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every row regardless of owner
    pub fn rows(&self) -> Vec<Note> {
        self.lock().rows.clone()
    }

    /// Number of open change feeds
    pub fn watcher_count(&self) -> usize {
        let mut table = self.lock();
        table.watchers.retain(|(_, tx)| !tx.is_closed());
        table.watchers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn authorize(&self, table: &Table, token: &str) -> CloudResult<User> {
        table.users.get(token).cloned().ok_or(CloudError::Http {
            status: 401,
            message: "invalid token".to_string(),
        })
    }

    fn check_writable(&self) -> CloudResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CloudError::Http {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CloudBackend for MemoryBackend {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    fn authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> CloudResult<String> {
        let mut url = format!("memory://auth/authorize?provider={}", provider);
        if let Some(redirect) = redirect_to {
            url.push_str("&redirect_to=");
            url.push_str(redirect);
        }
        Ok(url)
    }

    async fn fetch_user(&self, token: &str) -> CloudResult<User> {
        let table = self.lock();
        self.authorize(&table, token)
    }

    async fn refresh_session(&self, refresh_token: &str) -> CloudResult<TokenGrant> {
        let table = self.lock();
        let grant = table.refresh_tokens.get(refresh_token).and_then(|access| {
            table.users.get(access).map(|user| TokenGrant {
                access_token: access.clone(),
                refresh_token: None,
                expires_in: Some(3600),
                user: user.clone(),
            })
        });
        grant.ok_or(CloudError::Http {
            status: 400,
            message: "invalid refresh token".to_string(),
        })
    }

    async fn sign_out(&self, _token: &str) -> CloudResult<()> {
        Ok(())
    }

    async fn fetch_notes(&self, token: &str, owner: &str) -> CloudResult<Vec<Note>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let table = self.lock();
        self.authorize(&table, token)?;

        let mut notes: Vec<Note> = table
            .rows
            .iter()
            .filter(|n| n.user_id.as_deref() == Some(owner))
            .cloned()
            .collect();
        // Stable sort; rows without a position go last like SQL "nulls last"
        notes.sort_by_key(|n| (n.order.is_none(), n.order));
        Ok(notes)
    }

    async fn insert_notes(&self, token: &str, notes: &[Note]) -> CloudResult<()> {
        self.check_writable()?;
        let mut table = self.lock();
        self.authorize(&table, token)?;

        if let Some(dup) = notes
            .iter()
            .find(|n| table.rows.iter().any(|row| row.id == n.id))
        {
            return Err(CloudError::Http {
                status: 409,
                message: format!("duplicate key value violates unique constraint: {}", dup.id),
            });
        }

        table.rows.extend_from_slice(notes);
        for note in notes {
            if let Some(owner) = note.user_id.clone() {
                table.notify(&owner, ChangeEvent::new(ChangeKind::Insert, Some(note.id)));
            }
        }
        Ok(())
    }

    async fn upsert_notes(&self, token: &str, notes: &[Note]) -> CloudResult<()> {
        self.check_writable()?;
        let mut table = self.lock();
        self.authorize(&table, token)?;

        for note in notes {
            let kind = match table.rows.iter().position(|row| row.id == note.id) {
                Some(index) => {
                    table.rows[index] = note.clone();
                    ChangeKind::Update
                }
                None => {
                    table.rows.push(note.clone());
                    ChangeKind::Insert
                }
            };
            if let Some(owner) = note.user_id.clone() {
                table.notify(&owner, ChangeEvent::new(kind, Some(note.id)));
            }
        }
        Ok(())
    }

    async fn update_note(
        &self,
        token: &str,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> CloudResult<()> {
        self.check_writable()?;
        let mut table = self.lock();
        self.authorize(&table, token)?;

        let Some(row) = table.rows.iter_mut().find(|n| n.id == id) else {
            return Err(CloudError::NoteNotFound(id));
        };
        apply_fields(row, &fields)?;
        let owner = row.user_id.clone();

        if let Some(owner) = owner {
            table.notify(&owner, ChangeEvent::new(ChangeKind::Update, Some(id)));
        }
        Ok(())
    }

    async fn delete_note(&self, token: &str, id: Uuid) -> CloudResult<()> {
        self.check_writable()?;
        let mut table = self.lock();
        self.authorize(&table, token)?;

        let Some(index) = table.rows.iter().position(|n| n.id == id) else {
            return Ok(());
        };
        let removed = table.rows.remove(index);
        if let Some(owner) = removed.user_id {
            table.notify(&owner, ChangeEvent::new(ChangeKind::Delete, Some(id)));
        }
        Ok(())
    }

    async fn upsert_order(&self, token: &str, rows: &[OrderRow]) -> CloudResult<()> {
        self.check_writable()?;
        let mut table = self.lock();
        self.authorize(&table, token)?;

        let mut touched = Vec::new();
        for order_row in rows {
            if let Some(note) = table.rows.iter_mut().find(|n| n.id == order_row.id) {
                note.order = Some(order_row.order);
                note.updated_at = from_millis(order_row.updated_at)?;
                note.user_id = Some(order_row.user_id.clone());
                touched.push((order_row.user_id.clone(), order_row.id));
            }
        }
        for (owner, id) in touched {
            table.notify(&owner, ChangeEvent::new(ChangeKind::Update, Some(id)));
        }
        Ok(())
    }

    async fn changes(&self, token: &str, owner: &str) -> CloudResult<ChangeFeed> {
        let mut table = self.lock();
        self.authorize(&table, token)?;

        let (tx, feed) = ChangeFeed::channel();
        table.watchers.push((owner.to_string(), tx));
        Ok(feed)
    }
}

/// Apply a column map the way the service would
fn apply_fields(note: &mut Note, fields: &Map<String, Value>) -> CloudResult<()> {
    for (column, value) in fields {
        match column.as_str() {
            "title" => note.title = value.as_str().unwrap_or_default().to_string(),
            "content" => note.content = value.as_str().unwrap_or_default().to_string(),
            "color" => {
                note.color = match value.as_str() {
                    Some(token) => token.parse::<NoteColor>()?,
                    None => NoteColor::default(),
                }
            }
            "date" => note.date = value.as_str().map(str::to_string),
            "time" => note.time = value.as_str().map(str::to_string),
            "order" => note.order = value.as_i64(),
            "updatedAt" => {
                let millis = value
                    .as_i64()
                    .ok_or_else(|| CloudError::Decode("updatedAt must be an integer".into()))?;
                note.updated_at = from_millis(millis)?;
            }
            other => {
                return Err(CloudError::Http {
                    status: 400,
                    message: format!("unknown column '{}'", other),
                })
            }
        }
    }
    Ok(())
}

fn from_millis(millis: i64) -> CloudResult<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CloudError::Decode(format!("timestamp out of range: {}", millis)))
}
