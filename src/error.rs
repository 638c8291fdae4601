//! Error types for wheelsmith
//!
//! All modules use `WheelsmithResult<T>` as their return type. Archive
//! validation has its own `ValidationError` so callers can branch on the
//! exact check that failed.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for wheelsmith operations
pub type WheelsmithResult<T> = Result<T, WheelsmithError>;

/// Reasons an archive is rejected by the validator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("archive entry has unsafe path: {entry}")]
    UnsafeArchivePath { entry: String },

    #[error("archive is missing METADATA in its .dist-info directory")]
    MissingMetadata,

    #[error("archive is missing WHEEL format marker")]
    MissingFormatMarker,

    #[error("archive METADATA is invalid: {reason}")]
    InvalidMetadata { reason: String },

    #[error("archive could not be read: {reason}")]
    Unreadable { reason: String },
}

/// All errors that can occur in wheelsmith
#[derive(Error, Debug)]
pub enum WheelsmithError {
    // Validation and integrity errors
    #[error("Artifact validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("Corrupt cache entry {digest}: {reason}")]
    CorruptEntry { digest: String, reason: String },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    // Storage errors
    #[error("Storage write failed: {context}")]
    StorageWrite {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry not found: {0}")]
    EntryNotFound(String),

    #[error("Cache entry is in use: {0}")]
    EntryInUse(String),

    #[error("Refusing to delete dangerous path: {path}")]
    DangerousCleanupRefused { path: PathBuf },

    // Registry errors
    #[error("Registry unavailable at {endpoint}: {reason}")]
    RegistryUnavailable { endpoint: String, reason: String },

    #[error("Registry protocol error: {0}")]
    RegistryProtocol(String),

    #[error("Invalid artifact identifier: {0}")]
    InvalidArtifactId(String),

    // Build errors
    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Invalid project metadata at {path}: {reason}")]
    ProjectMetadata { path: PathBuf, reason: String },

    #[error("Build failed: {reason}")]
    BuildFailed { reason: String },

    #[error("Illegal build state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Unknown configuration key: {0}")]
    ConfigKeyUnknown(String),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML edit error: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl WheelsmithError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a storage write error with context
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageWrite {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a registry unavailable error
    pub fn registry_unavailable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RegistryUnavailable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Validation failure kind, if this error came from the archive validator
    pub fn validation_kind(&self) -> Option<&ValidationError> {
        match self {
            Self::ValidationFailed(kind) => Some(kind),
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RegistryUnavailable { .. })
    }

    /// Errors that must abort the whole run rather than degrade
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DangerousCleanupRefused { .. })
    }

    /// Tampering or disk corruption, as opposed to an ordinary miss
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::ValidationFailed(_) | Self::CorruptEntry { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RegistryUnavailable { .. } => {
                Some("Check registry.endpoint and the token environment variable, or build locally")
            }
            Self::DangerousCleanupRefused { .. } => {
                Some("Point build.output_dir or cache.root at a dedicated project directory")
            }
            Self::CorruptEntry { .. } => Some("Run: wheelsmith cache verify"),
            Self::ConfigInvalid { .. } | Self::ConfigKeyUnknown(_) => {
                Some("Run: wheelsmith config show")
            }
            Self::EntryInUse(_) => Some("Retry once the running build has finished"),
            _ => None,
        }
    }
}
