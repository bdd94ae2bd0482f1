//! Identity and session management
//!
//! A signed-in session is persisted in the data directory so the identity
//! survives restarts. The session's user is the sole switch between local
//! and cloud storage.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::persistence::atomic_write;
use crate::storage::{StorageError, StorageResult};

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
}

/// User record as returned by the identity provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: ProviderUserMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderUserMetadata {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<ProviderUser> for User {
    fn from(user: ProviderUser) -> Self {
        Self {
            uid: user.id,
            email: user.email,
            display_name: user.user_metadata.full_name,
            photo_url: user.user_metadata.avatar_url,
        }
    }
}

/// Renew this long before the access token runs out
const EXPIRY_MARGIN_SECS: i64 = 60;

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token stops being accepted, if known
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl Session {
    /// Whether the access token is expired or about to be
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now + Duration::seconds(EXPIRY_MARGIN_SECS))
    }
}

/// Tokens handed out by a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Rotated refresh token; `None` keeps the previous one
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    pub expires_in: Option<i64>,
    pub user: User,
}

impl TokenGrant {
    /// The session this grant starts at `now`
    pub fn into_session(self, previous_refresh: Option<String>, now: DateTime<Utc>) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self.expires_in.map(|secs| now + Duration::seconds(secs)),
            user: self.user,
        }
    }
}

/// Where to send the user to start the OAuth flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInRequest {
    pub provider: String,
    pub url: String,
}

/// Persists the current session to a file
///
/// A store without a path keeps nothing across restarts.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    path: Option<PathBuf>,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// Store that never touches disk
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Load the saved session
    ///
    /// Missing or unreadable session files mean "signed out".
    pub fn load(&self) -> Option<Session> {
        let path = self.path.as_ref()?;
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Could not read session file {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Ignoring malformed session file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> StorageResult<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(session)?;
        atomic_write(path, json.as_bytes())
    }

    pub fn clear(&self) -> StorageResult<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, path.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session() -> Session {
        Session {
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: DateTime::from_timestamp(1_900_000_000, 0),
            user: User {
                uid: "user-1".to_string(),
                email: Some("ana@example.com".to_string()),
                display_name: Some("Ana".to_string()),
                photo_url: None,
            },
        }
    }

    #[test]
    fn test_provider_user_conversion() {
        let json = r#"{
            "id": "abc",
            "email": "ana@example.com",
            "user_metadata": {"full_name": "Ana Lima", "avatar_url": "https://img/ana.png"}
        }"#;
        let provider: ProviderUser = serde_json::from_str(json).unwrap();
        let user = User::from(provider);

        assert_eq!(user.uid, "abc");
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));
        assert_eq!(user.display_name.as_deref(), Some("Ana Lima"));
        assert_eq!(user.photo_url.as_deref(), Some("https://img/ana.png"));
    }

    #[test]
    fn test_provider_user_without_metadata() {
        let provider: ProviderUser = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        let user = User::from(provider);
        assert!(user.display_name.is_none());
        assert!(user.email.is_none());
    }

    #[test]
    fn test_user_wire_names() {
        let value = serde_json::to_value(session().user).unwrap();
        assert!(value.get("displayName").is_some());
        assert!(value.get("photoURL").is_some());
    }

    #[test]
    fn test_session_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path().join("session.json"));

        assert!(store.load().is_none());

        store.save(&session()).unwrap();
        assert_eq!(store.load(), Some(session()));

        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_session_expiry() {
        let now = DateTime::from_timestamp(1_900_000_000, 0).unwrap();
        let mut session = session();

        session.expires_at = Some(now + Duration::hours(1));
        assert!(!session.is_expired(now));

        session.expires_at = Some(now + Duration::seconds(30));
        assert!(session.is_expired(now));

        session.expires_at = None;
        assert!(!session.is_expired(now));
    }

    #[test]
    fn test_session_without_expiry_still_loads() {
        let json = r#"{"accessToken": "t", "user": {"uid": "u1"}}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert!(session.expires_at.is_none());
        assert!(session.refresh_token.is_none());
    }

    #[test]
    fn test_grant_keeps_refresh_token_unless_rotated() {
        let now = DateTime::from_timestamp(1_900_000_000, 0).unwrap();
        let grant = TokenGrant {
            access_token: "fresh".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            user: session().user,
        };

        let renewed = grant.clone().into_session(Some("old".to_string()), now);
        assert_eq!(renewed.access_token, "fresh");
        assert_eq!(renewed.refresh_token.as_deref(), Some("old"));
        assert_eq!(renewed.expires_at, Some(now + Duration::hours(1)));

        let rotated = TokenGrant {
            refresh_token: Some("new".to_string()),
            ..grant
        }
        .into_session(Some("old".to_string()), now);
        assert_eq!(rotated.refresh_token.as_deref(), Some("new"));
    }

    #[test]
    fn test_malformed_session_is_signed_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.json");
        fs::write(&path, "garbage").unwrap();

        assert!(SessionStore::new(path).load().is_none());
    }

    #[test]
    fn test_ephemeral_store() {
        let store = SessionStore::ephemeral();
        store.save(&session()).unwrap();
        assert!(store.load().is_none());
    }
}
