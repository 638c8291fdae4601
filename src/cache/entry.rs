//! Cache entry records and derived statistics

use crate::hash::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Convert MB to bytes
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// Cache size status relative to configured limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSizeStatus {
    /// Under 80% of limit
    Ok,
    /// Between 80% and 100% of limit
    Warning,
    /// At or over the limit
    Exceeded,
}

impl CacheSizeStatus {
    /// Determine status based on current size and limit
    pub fn from_usage(current_bytes: u64, limit_bytes: u64) -> Self {
        let percent = Self::percentage(current_bytes, limit_bytes);
        if limit_bytes == 0 || percent < 80.0 {
            Self::Ok
        } else if percent < 100.0 {
            Self::Warning
        } else {
            Self::Exceeded
        }
    }

    /// Get percentage of limit used
    pub fn percentage(current_bytes: u64, limit_bytes: u64) -> f64 {
        if limit_bytes == 0 {
            return 0.0;
        }
        (current_bytes as f64 / limit_bytes as f64) * 100.0
    }
}

/// Package identity read from archive metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub version: String,
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// One stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 of the artifact bytes; the entry's identity
    pub digest: Digest,
    /// Fingerprint of the build inputs that produced it
    pub source_spec_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Blob location, relative to the cache root
    pub storage_path: PathBuf,
    /// Original wheel file name
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageId>,
}

impl CacheEntry {
    /// Name shown in listings: package identity if known, else file name
    pub fn display_name(&self) -> String {
        match &self.package {
            Some(pkg) => pkg.to_string(),
            None => self.file_name.clone(),
        }
    }

    /// Check if this entry was last used more than the given number of days ago
    pub fn is_idle_for_days(&self, days: u32) -> bool {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        self.last_accessed_at < cutoff
    }
}

/// How to find an artifact in the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Exact artifact bytes
    Digest(Digest),
    /// Build inputs that produced the artifact
    Fingerprint(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digest(d) => write!(f, "digest:{}", d.short()),
            Self::Fingerprint(fp) => {
                let short: String = fp.chars().take(12).collect();
                write!(f, "fingerprint:{}", short)
            }
        }
    }
}

/// Read-only snapshot of cache counters and contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub corruption_count: u64,
}

impl CacheStats {
    /// Hit ratio over all lookups, or None before the first lookup
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hit_count + self.miss_count;
        (total > 0).then(|| self.hit_count as f64 / total as f64)
    }
}
