//! Engine configuration
//!
//! `EngineConfig` is read from `engine.json` in the config directory, with
//! every field defaulted. An optional `channels.json` replaces the channel
//! rules. Gmail OAuth credentials load from (in order of priority):
//! 1. Compile-time embedded credentials (for release builds)
//! 2. `google-credentials.json` (Google Cloud Console format)
//! 3. Runtime environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classify::ChannelRules;
use crate::remote::RetryPolicy;

/// Engine settings filename in the config directory
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

/// Channel rules override filename
pub const CHANNELS_FILE: &str = "channels.json";

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

const CLIENT_ID_ENV: &str = "TRIAGE_GMAIL_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "TRIAGE_GMAIL_CLIENT_SECRET";

/// Local Ollama endpoint and models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub embed_model: String,
    pub summary_model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            summary_model: "llama3.1:8b-instruct-q4_K_M".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Tunables for sync, search and summarization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mailbox scope the cursors belong to
    pub scope: String,
    /// Messages listed when bootstrapping incremental sync
    pub initial_sync_limit: usize,
    /// Messages per historical page
    pub history_page_size: usize,
    /// Maximum search results
    pub search_top_k: usize,
    /// Weight of the normalized lexical score in hybrid ranking
    pub lexical_weight: f32,
    /// Index text is truncated to this many characters
    pub index_text_limit: usize,
    /// Scheduler cadence
    pub sync_interval_secs: u64,
    /// Minimum gap between scheduled syncs
    pub sync_cooldown_secs: u64,
    pub retry: RetryPolicy,
    pub ollama: OllamaConfig,
    /// Mark a message read when its body is opened
    pub mark_read_on_open: bool,
    pub channels: ChannelRules,
    /// Ask the summary model for importance and deadline; channels stay rule-based
    pub model_classification: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scope: "me".to_string(),
            initial_sync_limit: 50,
            history_page_size: 500,
            search_top_k: 10,
            lexical_weight: 0.5,
            index_text_limit: 4000,
            sync_interval_secs: 300,
            sync_cooldown_secs: 60,
            retry: RetryPolicy::default(),
            ollama: OllamaConfig::default(),
            mark_read_on_open: true,
            channels: ChannelRules::default(),
            model_classification: false,
        }
    }
}

impl EngineConfig {
    /// Load `engine.json` and `channels.json` from the config directory
    pub fn load() -> Result<Self> {
        let mut config: Self = config::load_json_or_default(ENGINE_CONFIG_FILE)?;
        if config::config_exists(CHANNELS_FILE) {
            config.channels = config::load_json(CHANNELS_FILE)
                .with_context(|| format!("Failed to load {}", CHANNELS_FILE))?;
        }
        Ok(config)
    }

    /// Load from an explicit file (channels override not applied)
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Write the current settings to `engine.json`
    pub fn save(&self) -> Result<()> {
        config::save_json(ENGINE_CONFIG_FILE, self)
    }
}

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Desktop ("installed") and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var(CLIENT_ID_ENV)
            .with_context(|| format!("{} environment variable not set", CLIENT_ID_ENV))?;
        let client_secret = std::env::var(CLIENT_SECRET_ENV)
            .with_context(|| format!("{} environment variable not set", CLIENT_SECRET_ENV))?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }

    /// Check if credentials are available (compile-time, file, or env vars)
    pub fn is_available() -> bool {
        Self::from_compile_time().is_some()
            || config::config_exists(CREDENTIALS_FILE)
            || (std::env::var(CLIENT_ID_ENV).is_ok() && std::env::var(CLIENT_SECRET_ENV).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_engine_config_uses_defaults() {
        let json = r#"{ "search_top_k": 25, "ollama": { "url": "http://gpu-box:11434" } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.search_top_k, 25);
        assert_eq!(config.ollama.url, "http://gpu-box:11434");
        assert_eq!(config.ollama.embed_model, "nomic-embed-text");
        assert_eq!(config.initial_sync_limit, 50);
        assert_eq!(config.channels.fallback, "People");
        assert!(!config.model_classification);
    }

    #[test]
    fn test_engine_config_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(ENGINE_CONFIG_FILE);
        let mut config = EngineConfig::default();
        config.mark_read_on_open = false;
        config::save_json_file(&path, &config).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "test-secret");
    }

    #[test]
    fn test_parse_web_credentials() {
        let json = r#"{ "web": { "client_id": "web-id", "client_secret": "web-secret" } }"#;
        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "web-id");
    }

    #[test]
    fn test_invalid_credentials_json() {
        assert!(GmailCredentials::from_json(r#"{ "other": {} }"#).is_err());
    }
}
