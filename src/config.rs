//! Configuration Management
//!
//! Connection settings and reconciler behavior for lookerctl.
//! Precedence: CLI flags > environment > config file > defaults.

use crate::looker::client::DEFAULT_API_VERSION;
use crate::reconcile::{MissingUserPolicy, ReconcilerOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const ENV_BASE_URL: &str = "LOOKER_BASE_URL";
pub const ENV_CLIENT_ID: &str = "LOOKER_API_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "LOOKER_API_CLIENT_SECRET";
pub const ENV_API_VERSION: &str = "LOOKER_API_VERSION";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

fn default_true() -> bool {
    true
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Looker instance URL, e.g. `https://mycompany.cloud.looker.com`
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Prefer the environment variable; kept here for parity with provider configs
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub rollback_on_create_failure: bool,
    #[serde(default = "default_true")]
    pub sync_roles_on_update: bool,
    #[serde(default)]
    pub missing_user_policy: MissingUserPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            api_version: None,
            client_id: None,
            client_secret: None,
            request_timeout_secs: None,
            rollback_on_create_failure: true,
            sync_roles_on_update: true,
            missing_user_policy: MissingUserPolicy::Fail,
        }
    }
}

/// Everything needed to build a client, after precedence is applied
#[derive(Debug, Clone)]
pub struct Connection {
    pub base_url: Url,
    pub api_version: String,
    pub client_id: String,
    pub client_secret: String,
    pub request_timeout: Duration,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("lookerctl").join("config.json"))
    }

    /// Load configuration from an explicit path, or the default location.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Point the config file at `base_url`, keeping its other settings
    ///
    /// A file that stores `client_secret` is left untouched: `save` never
    /// writes the secret, so rewriting it would silently drop it.
    pub fn init(path: &Path, base_url: &str, client_id: Option<&str>) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(Some(path))?
        } else {
            Self::default()
        };

        if config.client_secret.is_some() {
            anyhow::bail!(
                "{} stores client_secret, which is never written back. Move it to {} and remove it from the file first",
                path.display(),
                ENV_CLIENT_SECRET
            );
        }

        Url::parse(base_url).with_context(|| format!("Invalid Looker URL: {base_url}"))?;
        config.base_url = Some(base_url.to_string());
        if let Some(client_id) = client_id {
            config.client_id = Some(client_id.to_string());
        }

        config.save(path)?;
        tracing::info!("Wrote config to {}", path.display());
        Ok(config)
    }

    /// Overlay environment variables on top of file values
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty(ENV_BASE_URL) {
            self.base_url = Some(v);
        }
        if let Some(v) = non_empty(ENV_CLIENT_ID) {
            self.client_id = Some(v);
        }
        if let Some(v) = non_empty(ENV_CLIENT_SECRET) {
            self.client_secret = Some(v);
        }
        if let Some(v) = non_empty(ENV_API_VERSION) {
            self.api_version = Some(v);
        }
    }

    /// Get effective API version (config > default)
    pub fn effective_api_version(&self) -> String {
        self.api_version
            .clone()
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string())
    }

    pub fn effective_request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            rollback_on_create_failure: self.rollback_on_create_failure,
            sync_roles_on_update: self.sync_roles_on_update,
            missing_user_policy: self.missing_user_policy,
        }
    }

    /// Resolve and validate connection settings
    pub fn connection(&self) -> Result<Connection> {
        let base_url = self.base_url.as_deref().with_context(|| {
            format!("No Looker URL configured. Set {ENV_BASE_URL} or base_url in the config file")
        })?;
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid Looker URL: {base_url}"))?;
        if !matches!(base_url.scheme(), "https" | "http") {
            anyhow::bail!("Looker URL must use http or https, got {}", base_url.scheme());
        }

        let client_id = self
            .client_id
            .clone()
            .with_context(|| format!("No API client id configured. Set {ENV_CLIENT_ID}"))?;
        let client_secret = self
            .client_secret
            .clone()
            .with_context(|| format!("No API client secret configured. Set {ENV_CLIENT_SECRET}"))?;

        Ok(Connection {
            base_url,
            api_version: self.effective_api_version(),
            client_id,
            client_secret,
            request_timeout: self.effective_request_timeout(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.rollback_on_create_failure);
        assert!(config.sync_roles_on_update);
        assert_eq!(config.missing_user_policy, MissingUserPolicy::Fail);
        assert_eq!(config.effective_api_version(), "4.0");
        assert_eq!(config.effective_request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: Config = serde_json::from_str(
            r#"{"base_url": "https://old.example.com", "client_id": "file-id", "missing_user_policy": "ignore"}"#,
        )
        .unwrap();
        config.apply_env_from(env(&[
            (ENV_BASE_URL, "https://new.example.com"),
            (ENV_CLIENT_SECRET, "s3cret"),
            (ENV_CLIENT_ID, "  "),
        ]));

        assert_eq!(config.base_url.as_deref(), Some("https://new.example.com"));
        assert_eq!(config.client_id.as_deref(), Some("file-id"));
        assert_eq!(config.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(
            config.reconciler_options().missing_user_policy,
            MissingUserPolicy::Ignore
        );
    }

    #[test]
    fn test_connection_requires_credentials() {
        let config = Config {
            base_url: Some("https://looker.example.com".to_string()),
            ..Config::default()
        };
        let err = config.connection().unwrap_err();
        assert!(err.to_string().contains(ENV_CLIENT_ID));
    }

    #[test]
    fn test_connection_rejects_bad_url() {
        let config = Config {
            base_url: Some("ftp://looker.example.com".to_string()),
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            ..Config::default()
        };
        assert!(config.connection().is_err());

        let config = Config {
            base_url: Some("not a url".to_string()),
            ..config
        };
        assert!(config.connection().is_err());
    }

    #[test]
    fn test_secret_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("secret"));

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.client_id.as_deref(), Some("id"));
        assert_eq!(loaded.client_secret, None);
    }

    #[test]
    fn test_init_keeps_existing_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"client_id": "id", "sync_roles_on_update": false}"#).unwrap();

        let config = Config::init(&path, "https://looker.example.com", None).unwrap();
        assert_eq!(config.client_id.as_deref(), Some("id"));

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.base_url.as_deref(), Some("https://looker.example.com"));
        assert!(!loaded.sync_roles_on_update);
    }

    #[test]
    fn test_init_refuses_to_drop_stored_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let original = r#"{"client_id": "id", "client_secret": "s3cret"}"#;
        std::fs::write(&path, original).unwrap();

        let err = Config::init(&path, "https://looker.example.com", None).unwrap_err();
        assert!(err.to_string().contains(ENV_CLIENT_SECRET));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_init_rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(Config::init(&path, "not a url", None).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.json"))).is_err());
    }
}
