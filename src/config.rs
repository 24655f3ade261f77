//! Configuration loading and management
//!
//! Handles parsing of `.taskdesk.toml` configuration files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Role;

/// Name of the configuration file at the workspace root
pub const CONFIG_FILE: &str = ".taskdesk.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory, relative to the workspace root
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Document store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Analytics configuration
    #[serde(default)]
    pub stats: StatsConfig,

    /// Account configuration
    #[serde(default)]
    pub accounts: AccountsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store: StoreConfig::default(),
            stats: StatsConfig::default(),
            accounts: AccountsConfig::default(),
        }
    }
}

fn default_data_dir() -> String {
    ".taskdesk".to_string()
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a commit waits for the store lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Quiet period before external file changes are reloaded
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    crate::lock::DEFAULT_LOCK_TIMEOUT_MS
}

fn default_watch_debounce_ms() -> u64 {
    200
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}

/// Analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Number of tasks reported in `recent_tasks`
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

fn default_recent_limit() -> usize {
    crate::stats::DEFAULT_RECENT_LIMIT
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
        }
    }
}

/// Account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Minimum accepted password length
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,

    /// Role assigned at sign-up when none is requested
    #[serde(default = "default_role")]
    pub default_role: String,
}

fn default_min_password_len() -> usize {
    6
}

fn default_role() -> String {
    "user".to_string()
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            min_password_len: default_min_password_len(),
            default_role: default_role(),
        }
    }
}

impl AccountsConfig {
    /// Parsed default role.
    pub fn default_role(&self) -> crate::error::Result<Role> {
        Role::parse(&self.default_role).map_err(|_| {
            crate::error::Error::InvalidConfig(format!(
                "accounts.default_role: invalid role '{}' (expected user|admin)",
                self.default_role
            ))
        })
    }
}

impl Config {
    /// Load configuration from a `.taskdesk.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the workspace root, or return defaults
    pub fn load_from_root(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Absolute data directory for a workspace root
    pub fn data_dir_for(&self, root: &Path) -> PathBuf {
        root.join(&self.data_dir)
    }

    fn validate(&self) -> crate::error::Result<()> {
        if self.data_dir.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "data_dir cannot be empty".to_string(),
            ));
        }
        self.store.validate()?;
        self.stats.validate()?;
        self.accounts.validate()?;
        Ok(())
    }
}

impl StoreConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "store.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.watch_debounce_ms == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "store.watch_debounce_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl StatsConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.recent_limit == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "stats.recent_limit must be >= 1".to_string(),
            ));
        }
        if self.recent_limit > 100 {
            return Err(crate::error::Error::InvalidConfig(
                "stats.recent_limit must be <= 100".to_string(),
            ));
        }
        Ok(())
    }
}

impl AccountsConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.min_password_len < 6 {
            return Err(crate::error::Error::InvalidConfig(
                "accounts.min_password_len must be >= 6".to_string(),
            ));
        }
        self.default_role()?;
        Ok(())
    }
}
