//! Configuration loading and storage

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ClientConfig, Credentials};
use crate::auth::{
    AuthHeaderResolver, FileStorage, OAuthRefresher, SessionManager, SessionOptions,
    StoreOptions, TokenStore, DEFAULT_BACKGROUND_INTERVAL, DEFAULT_REFRESH_MARGIN,
};

const DEFAULT_API_BASE: &str = "https://api.campus.example.com/v1";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST API base URL
    pub api_base_url: String,
    pub oauth: OAuthConfig,
    pub session: SessionConfig,
}

/// OAuth2 client registration used for token refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub authorize_url: String,
    pub token_url: String,
    /// OAuth2 client ID (public client)
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Scopes requested on refresh
    pub scopes: Vec<String>,
}

/// Session refresh tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Refresh this many seconds before the access token expires
    pub refresh_margin_secs: u64,
    /// Background refresh check period
    pub background_interval_secs: u64,
    /// Load persisted tokens before first use
    pub auto_hydrate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            oauth: OAuthConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorize_url: "https://auth.campus.example.com/oauth/authorize".to_string(),
            token_url: "https://auth.campus.example.com/oauth/token".to_string(),
            client_id: "campus-cli".to_string(),
            client_secret: None,
            scopes: vec!["offline_access".to_string()],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN.as_secs(),
            background_interval_secs: DEFAULT_BACKGROUND_INTERVAL.as_secs(),
            auto_hydrate: true,
        }
    }
}

impl SessionConfig {
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    /// Zero would spin the timer; clamp to one second.
    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_interval_secs.max(1))
    }
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "campus", "campus")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (may contain a client secret)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Session backed by the token file in the config directory, refreshing
    /// through the configured OAuth2 token endpoint.
    pub fn session_manager(&self) -> Result<SessionManager> {
        let storage = FileStorage::in_dir(&Self::config_dir()?);
        let store = TokenStore::new(
            StoreOptions::default()
                .storage(storage)
                .auto_hydrate(self.session.auto_hydrate),
        );
        let options = SessionOptions::default()
            .handler(OAuthRefresher::new(&self.oauth)?)
            .refresh_margin(self.session.refresh_margin())
            .background_interval(self.session.background_interval());
        Ok(SessionManager::new(store, options))
    }

    /// API client authenticating through `session`.
    pub fn api_client(&self, session: SessionManager) -> Result<ApiClient> {
        let credentials = Credentials::Session(AuthHeaderResolver::new(session));
        Ok(ApiClient::new(ClientConfig::new(&self.api_base_url, credentials)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.session.refresh_margin(), Duration::from_secs(30));
        assert!(cfg.session.auto_hydrate);
    }

    #[test]
    fn test_partial_config_overrides() {
        let cfg = Config::parse(
            r#"
api_base_url = "http://localhost:8080"

[oauth]
client_id = "tenant-app"
scopes = ["courses:read", "offline_access"]

[session]
refresh_margin_secs = 120
background_interval_secs = 0
"#,
        )
        .unwrap();

        assert_eq!(cfg.api_base_url, "http://localhost:8080");
        assert_eq!(cfg.oauth.client_id, "tenant-app");
        assert_eq!(cfg.oauth.token_url, OAuthConfig::default().token_url);
        assert_eq!(cfg.session.refresh_margin(), Duration::from_secs(120));
        assert_eq!(cfg.session.background_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut cfg = Config::default();
        cfg.oauth.client_secret = Some("s3cret".into());
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert_eq!(Config::parse(&text).unwrap(), cfg);
    }

    #[test]
    fn test_api_client_uses_base_url() {
        let mut cfg = Config::default();
        cfg.api_base_url = "http://localhost:8080/api".into();
        let session = SessionManager::new(TokenStore::in_memory(None), SessionOptions::default());
        let client = cfg.api_client(session).unwrap();
        assert_eq!(
            client.url("communities").unwrap().as_str(),
            "http://localhost:8080/api/communities"
        );
    }

    #[test]
    fn test_malformed_config_errors() {
        assert!(Config::parse("session = 5").is_err());
    }
}
