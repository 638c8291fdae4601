//! Audit logging for integrity and security events
//!
//! Writes JSON lines to `<state_dir>/audit.log`. Corrupt cache entries,
//! rejected archives, refused cleanups and registry traffic are recorded
//! here so they can be told apart from ordinary cache misses.

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Event names written to the audit log
pub mod events {
    pub const CACHE_CORRUPT: &str = "cache.corrupt";
    pub const VALIDATION_REJECTED: &str = "validation.rejected";
    pub const CLEANUP_REFUSED: &str = "cleanup.refused";
    pub const REGISTRY_PUSHED: &str = "registry.pushed";
    pub const REGISTRY_REJECTED: &str = "registry.rejected";
    pub const BUILD_COMPLETED: &str = "build.completed";
    pub const BUILD_FAILED: &str = "build.failed";
}

/// File-based audit logger that appends JSON lines
#[derive(Debug, Clone)]
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    /// Create a new audit logger from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: ConfigManager::audit_log_path(),
        }
    }

    /// Audit logger writing to an explicit file
    pub fn at(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            enabled,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log an audit event as a JSON line
    ///
    /// Drops events on IO failure after a warning; audit logging must never
    /// fail the primary workflow.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_json_line() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"), true);

        audit
            .log(
                events::CACHE_CORRUPT,
                &serde_json::json!({"digest": "abc123"}),
            )
            .await;

        let content = tokio::fs::read_to_string(audit.path()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();

        assert_eq!(parsed["event"], "cache.corrupt");
        assert_eq!(parsed["data"]["digest"], "abc123");
        assert!(parsed["timestamp"].is_string());
    }

    #[tokio::test]
    async fn appends_multiple_lines() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::at(dir.path().join("nested/audit.log"), true);

        audit.log(events::BUILD_COMPLETED, &serde_json::json!({})).await;
        audit.log(events::BUILD_FAILED, &serde_json::json!({})).await;

        let content = tokio::fs::read_to_string(audit.path()).await.unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn skips_when_disabled() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"), false);

        audit.log("should.not.appear", &serde_json::json!({})).await;

        assert!(!audit.path().exists());
    }
}
