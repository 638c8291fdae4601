//! Configuration schema for wheelsmith
//!
//! Configuration is stored at `~/.config/wheelsmith/config.toml`, with an
//! optional project-local `.wheelsmith.toml` layered on top. Unknown keys
//! are rejected in every section.

use crate::build::DEFAULT_BUILD_COMMAND;
use crate::cache::FingerprintPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Local artifact cache
    pub cache: CacheConfig,

    /// Remote wheel registry
    pub registry: RegistrySettings,

    /// Build defaults
    pub build: BuildConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Local cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache root (default: the platform cache directory)
    pub root: Option<PathBuf>,

    /// Maximum total artifact size in MB (0 = unlimited)
    pub max_size_mb: u64,

    /// Maximum number of entries (0 = unlimited)
    pub max_entries: usize,

    /// Re-hash blobs before serving them
    pub verify_on_lookup: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_size_mb: 2048,
            max_entries: 0,
            verify_on_lookup: true,
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    /// Base URL; the registry is disabled when unset
    pub endpoint: Option<String>,

    /// Namespace artifacts are published under
    pub namespace: String,

    /// Environment variable holding the bearer token
    pub token_env: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Largest artifact accepted on pull, in MB
    pub max_download_mb: u64,

    /// Total push attempts while the registry is unavailable
    pub push_retries: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            namespace: "default".to_string(),
            token_env: "WHEELSMITH_REGISTRY_TOKEN".to_string(),
            timeout_secs: 30,
            max_download_mb: 512,
            push_retries: 3,
        }
    }
}

/// Build defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Output directory, relative to the project
    pub output_dir: PathBuf,

    /// Remove the output directory before building
    pub clean_output: bool,

    /// Push new artifacts to the registry
    pub publish: bool,

    /// Try the registry before building
    pub pull: bool,

    /// Backend command; `{source_dir}` and `{out_dir}` are substituted
    pub command: Vec<String>,

    /// Build fingerprint composition
    pub fingerprint: FingerprintPolicy,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dist"),
            clean_output: false,
            publish: false,
            pull: true,
            command: DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
            fingerprint: FingerprintPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("[build.fingerprint]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.registry.namespace, "default");
        assert!(config.cache.verify_on_lookup);
        assert_eq!(config.build.command[0], "python");
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            max_entries = 10
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.max_size_mb, 2048); // default preserved
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("[cache]\nmax_size = 1\n").is_err());
        assert!(toml::from_str::<Config>("[vm]\nname = \"x\"\n").is_err());
        assert!(toml::from_str::<Config>("[build.fingerprint]\nplatform = true\n").is_err());
    }
}
