//! Hosted cloud backend
//!
//! Talks to the notes table through the REST interface (`rest/v1/notes`),
//! to the identity service (`auth/v1/*`) and to the realtime channel.
//! Every request carries the public key as `apikey` and the session token
//! as a bearer token.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::auth::{ProviderUser, TokenGrant, User};
use super::backend::{ChangeFeed, CloudBackend, OrderRow};
use super::realtime::{self, RealtimeConfig};
use super::{CloudError, CloudResult};
use crate::config::CloudSettings;
use crate::models::Note;

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Backend for the hosted service
pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    key: String,
}

impl RestBackend {
    pub fn new(settings: &CloudSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    /// Reuse an existing HTTP client
    pub fn with_client(http: reqwest::Client, settings: &CloudSettings) -> Self {
        Self {
            http,
            base_url: settings.url.trim_end_matches('/').to_string(),
            key: settings.key.clone(),
        }
    }

    fn notes_url(&self) -> String {
        format!("{}/rest/v1/notes", self.base_url)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// Attach the key and bearer headers
    fn authed(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder.header("apikey", &self.key).bearer_auth(token)
    }

    /// Map a non-success status to `CloudError::Http`
    async fn ensure_success(response: Response) -> CloudResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(CloudError::Http {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }
}

/// Pull the human-readable message out of an error body
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for field in ["message", "msg", "error_description", "error"] {
            if let Some(message) = value.get(field).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}

/// Body of a successful refresh-token grant
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: ProviderUser,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
            user: response.user.into(),
        }
    }
}

/// Rows for a bulk insert
///
/// The table requires every object in one insert to carry the same keys, so
/// optional fields are written as explicit nulls.
fn insert_rows(notes: &[Note]) -> CloudResult<Vec<Value>> {
    notes
        .iter()
        .map(|note| {
            let mut row =
                serde_json::to_value(note).map_err(|e| CloudError::Decode(e.to_string()))?;
            if let Value::Object(ref mut columns) = row {
                for optional in ["date", "time", "order", "userId"] {
                    columns.entry(optional).or_insert(Value::Null);
                }
            }
            Ok(row)
        })
        .collect()
}

#[async_trait]
impl CloudBackend for RestBackend {
    fn backend_tag(&self) -> &'static str {
        "rest"
    }

    fn authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> CloudResult<String> {
        let mut params = vec![("provider", provider)];
        if let Some(redirect) = redirect_to {
            params.push(("redirect_to", redirect));
        }
        let url = Url::parse_with_params(&self.auth_url("authorize"), &params)
            .map_err(|e| CloudError::Decode(e.to_string()))?;
        Ok(url.to_string())
    }

    async fn fetch_user(&self, token: &str) -> CloudResult<User> {
        let response = self
            .authed(self.http.get(self.auth_url("user")), token)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let user: ProviderUser = response
            .json()
            .await
            .map_err(|e| CloudError::Decode(e.to_string()))?;
        Ok(user.into())
    }

    async fn refresh_session(&self, refresh_token: &str) -> CloudResult<TokenGrant> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let grant: TokenResponse = response
            .json()
            .await
            .map_err(|e| CloudError::Decode(e.to_string()))?;
        Ok(grant.into())
    }

    async fn sign_out(&self, token: &str) -> CloudResult<()> {
        let response = self
            .authed(self.http.post(self.auth_url("logout")), token)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_notes(&self, token: &str, owner: &str) -> CloudResult<Vec<Note>> {
        let owner_filter = format!("eq.{}", owner);
        let response = self
            .authed(self.http.get(self.notes_url()), token)
            .query(&[
                ("select", "*"),
                ("userId", owner_filter.as_str()),
                ("order", "order.asc"),
            ])
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let notes: Vec<Note> = response
            .json()
            .await
            .map_err(|e| CloudError::Decode(e.to_string()))?;
        debug!("Fetched {} cloud notes for {}", notes.len(), owner);
        Ok(notes)
    }

    async fn insert_notes(&self, token: &str, notes: &[Note]) -> CloudResult<()> {
        if notes.is_empty() {
            return Ok(());
        }
        let response = self
            .authed(self.http.post(self.notes_url()), token)
            .header("Prefer", "return=minimal")
            .json(&insert_rows(notes)?)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn upsert_notes(&self, token: &str, notes: &[Note]) -> CloudResult<()> {
        if notes.is_empty() {
            return Ok(());
        }
        let response = self
            .authed(self.http.post(self.notes_url()), token)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&insert_rows(notes)?)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn update_note(
        &self,
        token: &str,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> CloudResult<()> {
        let id_filter = format!("eq.{}", id);
        let response = self
            .authed(self.http.patch(self.notes_url()), token)
            .query(&[("id", id_filter.as_str()), ("select", "id")])
            .header("Prefer", "return=representation")
            .json(&fields)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let matched: Vec<Value> = response
            .json()
            .await
            .map_err(|e| CloudError::Decode(e.to_string()))?;
        if matched.is_empty() {
            return Err(CloudError::NoteNotFound(id));
        }
        Ok(())
    }

    async fn delete_note(&self, token: &str, id: Uuid) -> CloudResult<()> {
        let id_filter = format!("eq.{}", id);
        let response = self
            .authed(self.http.delete(self.notes_url()), token)
            .query(&[("id", id_filter.as_str())])
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn upsert_order(&self, token: &str, rows: &[OrderRow]) -> CloudResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let response = self
            .authed(self.http.post(self.notes_url()), token)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn changes(&self, token: &str, owner: &str) -> CloudResult<ChangeFeed> {
        let config = RealtimeConfig::new(&self.base_url, &self.key, token, owner)?;
        Ok(realtime::spawn_channel(config))
    }
}
