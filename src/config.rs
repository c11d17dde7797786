use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::focus::{SelectionPolicy, SessionSettings};
use crate::gateway::{ConfiguredGateway, LocalGateway, RemoteGateway};
use crate::storage::{FileStore, KeyValueStore};

const APP_NAME: &str = "focus-guard";

/// Focus Guard configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_duration_hours")]
    pub default_duration_hours: u32,

    /// Durations offered to the user (hours)
    #[serde(default = "default_allowed_durations")]
    pub allowed_durations: Vec<u32>,

    /// Keep or clear the selection after an unlock
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// Record blocks in the local state file only
    #[default]
    Local,
    /// Talk to an enforcement daemon over HTTP
    Remote,
}

/// Enforcement backend settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub kind: GatewayKind,

    /// Base URL of the enforcement daemon (remote only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// State file location
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Defaults to the platform data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_duration_hours() -> u32 {
    1
}

fn default_allowed_durations() -> Vec<u32> {
    vec![1, 2, 4, 8]
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_duration_hours: default_duration_hours(),
            allowed_durations: default_allowed_durations(),
            selection_policy: SelectionPolicy::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: GatewayKind::default(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            crate::storage::ensure_directory_exists(parent)?;
        }

        let toml = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let session = &self.session;
        if session.allowed_durations.is_empty() {
            anyhow::bail!("At least one allowed duration is required");
        }
        if session.allowed_durations.contains(&0) {
            anyhow::bail!("Allowed durations must be at least 1 hour");
        }
        if !session.allowed_durations.contains(&session.default_duration_hours) {
            anyhow::bail!(
                "Default duration {}h is not one of the allowed durations {:?}",
                session.default_duration_hours,
                session.allowed_durations
            );
        }

        if self.gateway.timeout_secs == 0 {
            anyhow::bail!("Gateway timeout must be at least 1 second");
        }

        if self.gateway.kind == GatewayKind::Remote {
            let raw = self
                .gateway
                .url
                .as_deref()
                .context("Remote gateway requires a url")?;
            let url = url::Url::parse(raw).context("Invalid gateway URL")?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("Gateway URL must use http or https (got: {})", url.scheme());
            }
        }

        Ok(())
    }

    /// Check a requested duration against the allowed set
    pub fn check_duration(&self, hours: u32) -> Result<u32> {
        if !self.session.allowed_durations.contains(&hours) {
            anyhow::bail!(
                "Duration {}h is not allowed (choose one of {:?})",
                hours,
                self.session.allowed_durations
            );
        }
        Ok(hours)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.timeout_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            selection_policy: self.session.selection_policy,
            gateway_timeout: self.gateway_timeout(),
        }
    }

    /// Resolved state file path
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => get_default_state_path(),
        }
    }

    /// File-backed store at the configured location
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        let path = self.state_path()?;
        tracing::debug!("Using state file {}", path.display());
        Ok(Arc::new(FileStore::new(path)))
    }

    /// Build the configured gateway on top of `store`
    pub fn build_gateway(&self, store: Arc<dyn KeyValueStore>) -> Result<ConfiguredGateway> {
        match self.gateway.kind {
            GatewayKind::Local => Ok(ConfiguredGateway::Local(LocalGateway::new(store))),
            GatewayKind::Remote => {
                let url = self
                    .gateway
                    .url
                    .as_deref()
                    .context("Remote gateway requires a url")?;
                let gateway = RemoteGateway::new(url, self.gateway_timeout())
                    .context("Failed to create remote gateway")?;
                Ok(ConfiguredGateway::Remote(gateway))
            }
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .context("Could not determine the user's home directory")
}

/// Get the default config file path
pub fn get_default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the default state file path
pub fn get_default_state_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_local_dir().join("state.json"))
}
