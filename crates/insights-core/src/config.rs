//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/insights/config.toml)
//! 3. Environment variables (INSIGHTS_* prefix, plus the hosted-deployment aliases)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix
const ENV_PREFIX: &str = "INSIGHTS";

/// Alternative names the cloud endpoint is published under by hosting integrations
const CLOUD_URL_ALIASES: &[&str] = &["NEXT_PUBLIC_SUPABASE_URL", "SUPABASE_URL", "STORAGE_URL"];

/// Alternative names the public cloud key is published under
const CLOUD_KEY_ALIASES: &[&str] = &[
    "NEXT_PUBLIC_SUPABASE_ANON_KEY",
    "NEXT_PUBLIC_SUPABASE_PUBLISHABLE_KEY",
    "SUPABASE_ANON_KEY",
    "STORAGE_ANON_KEY",
];

/// Alternative name for the AI service key
const AI_KEY_ALIASES: &[&str] = &["API_KEY"];

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local data (note document, session)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Cloud service endpoint (optional)
    #[serde(default)]
    pub cloud_url: Option<String>,

    /// Public key for the cloud service (optional)
    #[serde(default)]
    pub cloud_key: Option<String>,

    /// OAuth provider used for sign-in
    #[serde(default = "default_auth_provider")]
    pub auth_provider: String,

    /// Where the provider redirects after sign-in
    #[serde(default)]
    pub redirect_url: Option<String>,

    /// Key for the generative AI service (optional)
    #[serde(default)]
    pub ai_api_key: Option<String>,

    /// Model used for text enhancement and summaries
    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    /// Model used for speech synthesis
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Log file path (logs go to stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Connection settings for the cloud store
///
/// Only exists when both the endpoint and the public key are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSettings {
    pub url: String,
    pub key: String,
    pub auth_provider: String,
    pub redirect_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cloud_url: None,
            cloud_key: None,
            auth_provider: default_auth_provider(),
            redirect_url: None,
            ai_api_key: None,
            ai_model: default_ai_model(),
            speech_model: default_speech_model(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file (~/.config/insights/config.toml or INSIGHTS_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_value("DATA_DIR", &[]) {
            self.data_dir = PathBuf::from(val);
        }

        if let Some(val) = env_value("CLOUD_URL", CLOUD_URL_ALIASES) {
            self.cloud_url = non_empty(val);
        }

        if let Some(val) = env_value("CLOUD_KEY", CLOUD_KEY_ALIASES) {
            self.cloud_key = non_empty(val);
        }

        if let Some(val) = env_value("AUTH_PROVIDER", &[]) {
            if !val.is_empty() {
                self.auth_provider = val;
            }
        }

        if let Some(val) = env_value("REDIRECT_URL", &[]) {
            self.redirect_url = non_empty(val);
        }

        if let Some(val) = env_value("AI_API_KEY", AI_KEY_ALIASES) {
            self.ai_api_key = non_empty(val);
        }

        if let Some(val) = env_value("AI_MODEL", &[]) {
            if !val.is_empty() {
                self.ai_model = val;
            }
        }

        if let Some(val) = env_value("SPEECH_MODEL", &[]) {
            if !val.is_empty() {
                self.speech_model = val;
            }
        }

        if let Some(val) = env_value("LOG_FILE", &[]) {
            self.log_file = non_empty(val).map(PathBuf::from);
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with INSIGHTS_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("insights")
            .join("config.toml")
    }

    /// Directory the local key-value store writes into
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Path of the persisted sign-in session
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Cloud settings, if both the endpoint and the key are present
    pub fn cloud_settings(&self) -> Option<CloudSettings> {
        let url = self.cloud_url.as_deref().map(str::trim).unwrap_or("");
        let key = self.cloud_key.as_deref().map(str::trim).unwrap_or("");
        if url.is_empty() || key.is_empty() {
            return None;
        }

        Some(CloudSettings {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            auth_provider: self.auth_provider.clone(),
            redirect_url: self.redirect_url.clone(),
        })
    }
}

/// Read `INSIGHTS_<name>`, falling back to the given aliases in order
fn env_value(name: &str, aliases: &[&str]) -> Option<String> {
    std::iter::once(format!("{}_{}", ENV_PREFIX, name))
        .chain(aliases.iter().map(|alias| alias.to_string()))
        .find_map(|var| std::env::var(var).ok())
}

fn non_empty(val: String) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("insights")
}

fn default_auth_provider() -> String {
    "google".to_string()
}

fn default_ai_model() -> String {
    "gemini-3-flash-preview".to_string()
}

pub(crate) fn default_speech_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "INSIGHTS_DATA_DIR",
        "INSIGHTS_CLOUD_URL",
        "INSIGHTS_CLOUD_KEY",
        "INSIGHTS_AUTH_PROVIDER",
        "INSIGHTS_REDIRECT_URL",
        "INSIGHTS_AI_API_KEY",
        "INSIGHTS_AI_MODEL",
        "INSIGHTS_LOG_FILE",
        "NEXT_PUBLIC_SUPABASE_URL",
        "SUPABASE_URL",
        "STORAGE_URL",
        "NEXT_PUBLIC_SUPABASE_ANON_KEY",
        "NEXT_PUBLIC_SUPABASE_PUBLISHABLE_KEY",
        "SUPABASE_ANON_KEY",
        "STORAGE_ANON_KEY",
        "API_KEY",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.cloud_url.is_none());
        assert!(config.cloud_key.is_none());
        assert_eq!(config.auth_provider, "google");
        assert!(config.data_dir.ends_with("insights"));
        assert!(config.cloud_settings().is_none());
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.session_path().ends_with("session.json"));
        assert_eq!(config.storage_dir(), config.data_dir);
    }

    #[test]
    fn test_cloud_settings_require_both_values() {
        let mut config = Config {
            cloud_url: Some("https://abc.example.co/".to_string()),
            ..Config::default()
        };
        assert!(config.cloud_settings().is_none());

        config.cloud_key = Some("   ".to_string());
        assert!(config.cloud_settings().is_none());

        config.cloud_key = Some("anon-key".to_string());
        let settings = config.cloud_settings().unwrap();
        assert_eq!(settings.url, "https://abc.example.co");
        assert_eq!(settings.key, "anon-key");
        assert_eq!(settings.auth_provider, "google");
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("INSIGHTS_DATA_DIR", "/tmp/insights-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/insights-test"));
    }

    #[test]
    fn test_env_override_cloud_values() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("INSIGHTS_CLOUD_URL", "https://cloud.example.com");
        env::set_var("INSIGHTS_CLOUD_KEY", "public");
        config.apply_env_overrides();
        assert_eq!(config.cloud_url.as_deref(), Some("https://cloud.example.com"));
        assert_eq!(config.cloud_key.as_deref(), Some("public"));

        // Empty string clears it
        env::set_var("INSIGHTS_CLOUD_URL", "");
        config.apply_env_overrides();
        assert!(config.cloud_url.is_none());
    }

    #[test]
    fn test_env_aliases() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("SUPABASE_URL", "https://alias.example.com");
        env::set_var("STORAGE_ANON_KEY", "alias-key");
        env::set_var("API_KEY", "ai-key");
        config.apply_env_overrides();

        assert_eq!(config.cloud_url.as_deref(), Some("https://alias.example.com"));
        assert_eq!(config.cloud_key.as_deref(), Some("alias-key"));
        assert_eq!(config.ai_api_key.as_deref(), Some("ai-key"));
    }

    #[test]
    fn test_prefixed_env_wins_over_alias() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("INSIGHTS_CLOUD_URL", "https://primary.example.com");
        env::set_var("SUPABASE_URL", "https://alias.example.com");
        config.apply_env_overrides();

        assert_eq!(
            config.cloud_url.as_deref(),
            Some("https://primary.example.com")
        );
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/insights"),
            cloud_url: Some("https://cloud.example.com".to_string()),
            cloud_key: Some("key".to_string()),
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("cloud_url"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            cloud_url = "https://example.com"
            cloud_key = "k"
            auth_provider = "github"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.auth_provider, "github");
        assert_eq!(config.ai_model, "gemini-3-flash-preview");
        assert!(config.cloud_settings().is_some());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("INSIGHTS_DATA_DIR", temp_dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        // Should return defaults when file doesn't exist
        assert!(config.cloud_url.is_none());
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = Config {
            data_dir: temp_dir.path().join("data"),
            ai_api_key: Some("secret".to_string()),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
