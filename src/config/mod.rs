//! Configuration management for wheelsmith

pub mod schema;

pub use schema::Config;

use crate::cache::{mb_to_bytes, CacheLimits};
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::registry::RegistryConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Name of the project-local config file
pub const LOCAL_CONFIG_FILE: &str = ".wheelsmith.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wheelsmith")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wheelsmith")
    }

    /// Get the audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Default artifact cache root
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wheelsmith")
    }

    /// Walk up from `start` looking for `.wheelsmith.toml`
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> WheelsmithResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> WheelsmithResult<Config> {
        let value = read_toml(path).await?;
        into_config(value, path)
    }

    /// Load the global config with a local config layered on top
    pub async fn load_merged(&self, local: Option<&Path>) -> WheelsmithResult<Config> {
        let Some(local) = local else {
            return self.load().await;
        };

        let mut base = if self.config_path.exists() {
            read_toml(&self.config_path).await?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };
        // Validate each layer on its own so errors name the right file
        into_config(base.clone(), &self.config_path)?;

        let overlay = read_toml(local).await?;
        into_config(overlay.clone(), local)?;

        merge_toml(&mut base, overlay);
        into_config(base, local)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> WheelsmithResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            WheelsmithError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> WheelsmithResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| WheelsmithError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure the state directory exists
    pub async fn ensure_state_dirs() -> WheelsmithResult<()> {
        let dir = Self::state_dir();
        fs::create_dir_all(&dir).await.map_err(|e| {
            WheelsmithError::io(format!("creating directory {}", dir.display()), e)
        })?;
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Cache root, falling back to the platform cache directory
    pub fn cache_root(&self) -> PathBuf {
        self.cache
            .root
            .clone()
            .unwrap_or_else(ConfigManager::default_cache_dir)
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_total_bytes: mb_to_bytes(self.cache.max_size_mb),
            max_entries: self.cache.max_entries,
            verify_on_lookup: self.cache.verify_on_lookup,
        }
    }

    /// Registry settings, `None` when no endpoint is configured
    pub fn registry_config(&self) -> WheelsmithResult<Option<RegistryConfig>> {
        let settings = &self.registry;
        let Some(endpoint) = settings.endpoint.as_deref().filter(|e| !e.trim().is_empty()) else {
            return Ok(None);
        };

        let mut config = RegistryConfig::new(endpoint, &settings.namespace)?
            .with_timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .with_max_download_bytes(mb_to_bytes(settings.max_download_mb));

        match std::env::var(&settings.token_env) {
            Ok(token) if !token.is_empty() => config = config.with_token(token),
            _ => debug!(var = %settings.token_env, "No registry token set"),
        }

        Ok(Some(config))
    }
}

async fn read_toml(path: &Path) -> WheelsmithResult<toml::Value> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| WheelsmithError::io(format!("reading config from {}", path.display()), e))?;

    content
        .parse::<toml::Value>()
        .map_err(|e| WheelsmithError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn into_config(value: toml::Value, path: &Path) -> WheelsmithResult<Config> {
    value
        .try_into()
        .map_err(|e: toml::de::Error| WheelsmithError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Recursively merge `overlay` into `base`; overlay wins on conflicts
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        merge_toml(existing, value)
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
