//! Registry client enforcing integrity on push and pull

use crate::audit::{events, AuditLog};
use crate::cache::{ArtifactCache, CacheEntry};
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use crate::registry::config::RegistryConfig;
use crate::registry::http::HttpTransport;
use crate::registry::transport::RegistryTransport;
use crate::registry::types::{ArtifactId, PulledArtifact, PushOutcome, RegistryRecord};
use crate::validate::ArchiveValidator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// First delay between push retries; doubles per attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Remote wheel registry.
///
/// Pulled bytes are untrusted: they are size-capped, re-hashed and validated
/// before anything is returned.
pub struct WheelRegistry {
    config: RegistryConfig,
    transport: Arc<dyn RegistryTransport>,
    validator: ArchiveValidator,
    audit: Option<AuditLog>,
}

impl WheelRegistry {
    /// Registry reached over HTTP
    pub fn new(config: RegistryConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.clone()));
        Self::with_transport(config, transport)
    }

    /// Registry behind any transport
    pub fn with_transport(config: RegistryConfig, transport: Arc<dyn RegistryTransport>) -> Self {
        Self {
            config,
            transport,
            validator: ArchiveValidator::new(),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.transport_name()
    }

    async fn audit(&self, event: &str, data: serde_json::Value) {
        if let Some(audit) = &self.audit {
            audit.log(event, &data).await;
        }
    }

    /// Run a transport call under the configured timeout
    async fn timed<T>(
        &self,
        op: &str,
        call: impl Future<Output = WheelsmithResult<T>>,
    ) -> WheelsmithResult<T> {
        match tokio::time::timeout(self.config.timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(WheelsmithError::registry_unavailable(
                self.config.endpoint().as_str(),
                format!("{} timed out after {:?}", op, self.config.timeout()),
            )),
        }
    }

    /// Publish a cached artifact. Never retries.
    ///
    /// Pushing a digest the registry already holds is a successful no-op.
    pub async fn push(&self, entry: &CacheEntry, bytes: &[u8]) -> WheelsmithResult<PushOutcome> {
        let actual = Digest::of_bytes(bytes);
        if actual != entry.digest {
            return Err(WheelsmithError::CorruptEntry {
                digest: entry.digest.to_string(),
                reason: format!("bytes to push hash to {}", actual.short()),
            });
        }
        let record = RegistryRecord::from_entry(entry)?;

        if self.timed("exists", self.transport.contains(&entry.digest)).await? {
            debug!(digest = %entry.digest.short(), "Registry already has artifact");
            return Ok(PushOutcome::AlreadyPresent);
        }

        self.timed("upload", self.transport.upload(&record, bytes))
            .await?;

        info!(
            digest = %entry.digest.short(),
            name = %record.name,
            version = %record.version,
            "Pushed artifact to registry"
        );
        self.audit(
            events::REGISTRY_PUSHED,
            serde_json::json!({
                "digest": record.digest.as_str(),
                "name": record.name,
                "version": record.version,
                "namespace": self.config.namespace(),
            }),
        )
        .await;
        Ok(PushOutcome::Uploaded)
    }

    /// Push, retrying `RegistryUnavailable` up to `attempts` total tries
    pub async fn push_with_retries(
        &self,
        entry: &CacheEntry,
        bytes: &[u8],
        attempts: u32,
    ) -> WheelsmithResult<PushOutcome> {
        let attempts = attempts.max(1);
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match self.push(entry, bytes).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, attempts, error = %e, "Registry push failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn reject(&self, id: &ArtifactId, reason: &str) {
        warn!(id = %id, reason, "Rejected registry artifact");
        self.audit(
            events::REGISTRY_REJECTED,
            serde_json::json!({ "id": id.to_string(), "reason": reason }),
        )
        .await;
    }

    /// Fetch and verify an artifact. `None` when the registry does not have it.
    pub async fn pull(&self, id: &ArtifactId) -> WheelsmithResult<Option<PulledArtifact>> {
        let Some(record) = self.timed("resolve", self.transport.resolve(id)).await? else {
            debug!(id = %id, "Registry miss");
            return Ok(None);
        };

        let mismatch = match id {
            ArtifactId::Digest(requested) if record.digest != *requested => {
                Some(format!("record describes {}", record.digest.short()))
            }
            ArtifactId::Source(fp) if record.source_spec_hash != *fp => Some(format!(
                "record was built from fingerprint {:?}",
                record.source_spec_hash
            )),
            _ => None,
        };
        if let Some(reason) = mismatch {
            self.reject(id, &reason).await;
            return Err(WheelsmithError::RegistryProtocol(reason));
        }

        let limit = self.config.max_download_bytes();
        if record.size_bytes > limit {
            let reason = format!("artifact is {} bytes, limit is {}", record.size_bytes, limit);
            self.reject(id, &reason).await;
            return Err(WheelsmithError::RegistryProtocol(reason));
        }

        let Some(bytes) = self
            .timed("download", self.transport.download(&record.digest, limit))
            .await?
        else {
            warn!(id = %id, "Registry record has no blob");
            return Ok(None);
        };

        let actual = Digest::of_bytes(&bytes);
        if actual != record.digest {
            let reason = format!("downloaded bytes hash to {}", actual.short());
            self.reject(id, &reason).await;
            return Err(WheelsmithError::CorruptEntry {
                digest: record.digest.to_string(),
                reason,
            });
        }

        let info = match self.validator.validate_bytes(&bytes) {
            Ok(info) => info,
            Err(rejection) => {
                self.reject(id, &rejection.to_string()).await;
                return Err(rejection.into());
            }
        };

        debug!(id = %id, digest = %record.digest.short(), bytes = bytes.len(), "Pulled artifact");
        Ok(Some(PulledArtifact {
            record,
            bytes,
            info,
        }))
    }

    /// Pull and hand the verified bytes to the local cache
    pub async fn pull_into(
        &self,
        id: &ArtifactId,
        cache: &ArtifactCache,
    ) -> WheelsmithResult<Option<CacheEntry>> {
        let Some(pulled) = self.pull(id).await? else {
            return Ok(None);
        };
        let entry = cache
            .insert_bytes(
                &pulled.bytes,
                &pulled.record.file_name,
                &pulled.record.source_spec_hash,
            )
            .await?;
        Ok(Some(entry))
    }
}
