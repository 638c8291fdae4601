//! CLI command implementations

pub mod build;
pub mod cache;
pub mod completions;
pub mod config;
pub mod registry;

pub use build::execute as build;
pub use cache::execute as cache;
pub use completions::execute as completions;
pub use config::execute as config;
pub use registry::execute as registry;

use crate::audit::AuditLog;
use crate::cache::{ArtifactCache, CacheEntry};
use crate::config::Config;
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use crate::registry::WheelRegistry;

/// Open the configured cache with audit logging attached
pub(crate) async fn open_cache(config: &Config) -> WheelsmithResult<ArtifactCache> {
    ArtifactCache::open_with_audit(
        config.cache_root(),
        config.cache_limits(),
        Some(AuditLog::new(config)),
    )
    .await
}

/// The configured registry, or an error naming the missing setting
pub(crate) fn open_registry(config: &Config) -> WheelsmithResult<WheelRegistry> {
    let settings = config.registry_config()?.ok_or_else(|| {
        WheelsmithError::User(
            "No registry configured. Run: wheelsmith config set registry.endpoint <URL>"
                .to_string(),
        )
    })?;
    Ok(WheelRegistry::new(settings).with_audit(AuditLog::new(config)))
}

/// Resolve a full digest or a unique prefix of at least 4 hex characters
pub(crate) async fn find_entry(cache: &ArtifactCache, query: &str) -> WheelsmithResult<CacheEntry> {
    if let Ok(digest) = Digest::parse(query) {
        return cache
            .get(&digest)
            .await
            .ok_or_else(|| WheelsmithError::EntryNotFound(digest.to_string()));
    }

    let prefix = query.trim_start_matches("sha256:").to_ascii_lowercase();
    if prefix.len() < 4 || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WheelsmithError::InvalidDigest(query.to_string()));
    }

    let mut matches: Vec<CacheEntry> = cache
        .entries()
        .await
        .into_iter()
        .filter(|e| e.digest.as_str().starts_with(&prefix))
        .collect();
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(WheelsmithError::EntryNotFound(query.to_string())),
        n => Err(WheelsmithError::User(format!(
            "Digest prefix '{}' is ambiguous ({} entries)",
            query, n
        ))),
    }
}
