//! Build orchestration
//!
//! Drives one run through lookup, fetch, build, validate, insert and
//! publish. Local cache and registry problems degrade the run to a local
//! build; only a refused cleanup, a failed build, or an invalid artifact
//! fail it.

use crate::audit::{events, AuditLog};
use crate::build::builder::ArtifactBuilder;
use crate::build::source::{ProjectMetadata, ResolvedSource};
use crate::build::state::{BuildState, BuildTracker};
use crate::cache::{ArtifactCache, BuildFingerprint, CacheEntry, CacheKey, CachedArtifact, FingerprintPolicy};
use crate::cleanup::remove_dir_guarded;
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use crate::registry::{ArtifactId, WheelRegistry};
use crate::validate::ArchiveValidator;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-engine behaviour switches
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub fingerprint: FingerprintPolicy,
    /// Remove the output directory before building
    pub clean_output: bool,
    /// Push freshly built artifacts to the registry
    pub publish: bool,
    /// Try the registry before building
    pub pull: bool,
    /// Total push attempts when the registry is unavailable
    pub push_attempts: u32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            fingerprint: FingerprintPolicy::default(),
            clean_output: false,
            publish: false,
            pull: true,
            push_attempts: 1,
        }
    }
}

/// What to build and where to put it
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source: ResolvedSource,
    pub project: ProjectMetadata,
    pub output_dir: PathBuf,
}

/// Where the delivered artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOrigin {
    LocalCache,
    Registry,
    Built,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub artifact_path: PathBuf,
    pub digest: Digest,
    pub from_cache: bool,
    pub duration_ms: u64,
    pub origin: ArtifactOrigin,
    /// The registry was unreachable at some point during the run
    pub degraded: bool,
    pub build_id: Uuid,
    pub fingerprint: String,
}

/// Builds wheels, consulting the cache and registry first
pub struct BuildEngine {
    cache: Arc<ArtifactCache>,
    builder: Arc<dyn ArtifactBuilder>,
    registry: Option<Arc<WheelRegistry>>,
    options: BuildOptions,
    audit: Option<AuditLog>,
}

struct RunState {
    tracker: BuildTracker,
    started: Instant,
    fingerprint: String,
    degraded: bool,
}

impl RunState {
    fn finish(
        &mut self,
        artifact_path: PathBuf,
        digest: Digest,
        origin: ArtifactOrigin,
    ) -> WheelsmithResult<BuildResult> {
        self.tracker.advance(BuildState::Done)?;
        Ok(BuildResult {
            artifact_path,
            digest,
            from_cache: origin != ArtifactOrigin::Built,
            duration_ms: self.started.elapsed().as_millis() as u64,
            origin,
            degraded: self.degraded,
            build_id: self.tracker.id(),
            fingerprint: self.fingerprint.clone(),
        })
    }
}

impl BuildEngine {
    pub fn new(
        cache: Arc<ArtifactCache>,
        builder: Arc<dyn ArtifactBuilder>,
        options: BuildOptions,
    ) -> Self {
        Self {
            cache,
            builder,
            registry: None,
            options,
            audit: None,
        }
    }

    pub fn with_registry(mut self, registry: WheelRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    async fn audit(&self, event: &str, data: serde_json::Value) {
        if let Some(audit) = &self.audit {
            audit.log(event, &data).await;
        }
    }

    /// Deliver a wheel for `request` into its output directory
    pub async fn build(&self, request: &BuildRequest) -> WheelsmithResult<BuildResult> {
        let mut run = RunState {
            tracker: BuildTracker::new(),
            started: Instant::now(),
            fingerprint: String::new(),
            degraded: false,
        };

        let outcome = self.run(request, &mut run).await;
        if let Err(e) = self.cache.flush().await {
            warn!(error = %e, "Failed to persist cache index");
        }

        match outcome {
            Ok(result) => {
                info!(
                    build_id = %result.build_id,
                    origin = ?result.origin,
                    digest = %result.digest.short(),
                    duration_ms = result.duration_ms,
                    "Build finished"
                );
                self.audit(
                    events::BUILD_COMPLETED,
                    serde_json::json!({
                        "build_id": result.build_id.to_string(),
                        "name": request.project.name,
                        "version": request.project.version,
                        "digest": result.digest.as_str(),
                        "origin": result.origin,
                        "degraded": result.degraded,
                    }),
                )
                .await;
                Ok(result)
            }
            Err(e) => {
                let reached = run.tracker.state();
                run.tracker.fail();
                warn!(build_id = %run.tracker.id(), state = %reached, error = %e, "Build failed");
                if let WheelsmithError::DangerousCleanupRefused { path } = &e {
                    self.audit(
                        events::CLEANUP_REFUSED,
                        serde_json::json!({
                            "build_id": run.tracker.id().to_string(),
                            "path": path.display().to_string(),
                        }),
                    )
                    .await;
                }
                self.audit(
                    events::BUILD_FAILED,
                    serde_json::json!({
                        "build_id": run.tracker.id().to_string(),
                        "name": request.project.name,
                        "version": request.project.version,
                        "state": reached,
                        "error": e.to_string(),
                    }),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn run(&self, request: &BuildRequest, run: &mut RunState) -> WheelsmithResult<BuildResult> {
        run.tracker.advance(BuildState::Resolving)?;
        if !request.source.path.is_dir() {
            return Err(WheelsmithError::SourceNotFound(request.source.path.clone()));
        }
        run.fingerprint = self.fingerprint(request).await?;

        run.tracker.advance(BuildState::CacheLookup)?;
        if let Some(hit) = self.lookup(&run.fingerprint).await? {
            run.tracker.advance(BuildState::CacheHit)?;
            info!(digest = %hit.digest().short(), "Cache hit, skipping build");
            let path = hit.copy_to(&request.output_dir).await?;
            return run.finish(path, hit.digest().clone(), ArtifactOrigin::LocalCache);
        }
        run.tracker.advance(BuildState::CacheMiss)?;

        if let Some(registry) = self.registry.as_ref().filter(|_| self.options.pull) {
            run.tracker.advance(BuildState::Fetching)?;
            if let Some(entry) = self.fetch(registry, run).await? {
                run.tracker.advance(BuildState::CacheInsert)?;
                let artifact = self.checkout(&entry).await?;
                self.evict().await;
                info!(digest = %entry.digest.short(), "Fetched from registry, skipping build");
                let path = artifact.copy_to(&request.output_dir).await?;
                return run.finish(path, entry.digest, ArtifactOrigin::Registry);
            }
        }

        run.tracker.advance(BuildState::Building)?;
        if self.options.clean_output {
            remove_dir_guarded(&request.output_dir)?;
        }
        let staging = self.cache.staging_workspace("build-")?;
        let wheel = self
            .builder
            .build(&request.source, &request.project, staging.path())
            .await?;

        run.tracker.advance(BuildState::Validating)?;
        self.validate(&wheel).await?;

        run.tracker.advance(BuildState::CacheInsert)?;
        let entry = self.cache.insert(&wheel, &run.fingerprint).await?;
        drop(staging);
        let artifact = self.checkout(&entry).await?;
        self.evict().await;

        if self.options.publish {
            if let Some(registry) = &self.registry {
                run.tracker.advance(BuildState::Publishing)?;
                self.publish(registry, &artifact, run).await?;
            }
        }

        let path = artifact.copy_to(&request.output_dir).await?;
        run.finish(path, entry.digest, ArtifactOrigin::Built)
    }

    async fn fingerprint(&self, request: &BuildRequest) -> WheelsmithResult<String> {
        let project = request.project.clone();
        let source = request.source.clone();
        let builder_id = self.builder.builder_id();
        let policy = self.options.fingerprint.clone();
        let fingerprint = tokio::task::spawn_blocking(move || {
            BuildFingerprint::compute(&project, &source, &builder_id, &policy)
        })
        .await
        .map_err(|e| WheelsmithError::Internal(format!("fingerprint task failed: {}", e)))??;
        Ok(fingerprint.to_string())
    }

    /// Cache lookup where corruption counts as a miss
    async fn lookup(&self, fingerprint: &str) -> WheelsmithResult<Option<CachedArtifact>> {
        match self
            .cache
            .lookup(&CacheKey::Fingerprint(fingerprint.to_string()))
            .await
        {
            Ok(hit) => Ok(hit),
            Err(e) if e.is_integrity_failure() => {
                warn!(error = %e, "Cached artifact failed verification, rebuilding");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Try the registry; any registry or integrity problem falls back to building
    async fn fetch(
        &self,
        registry: &WheelRegistry,
        run: &mut RunState,
    ) -> WheelsmithResult<Option<CacheEntry>> {
        let Ok(id) = ArtifactId::source(&run.fingerprint) else {
            debug!(fingerprint = %run.fingerprint, "Fingerprint is not addressable in the registry");
            return Ok(None);
        };

        let pulled = match registry.pull(&id).await {
            Ok(Some(pulled)) => pulled,
            Ok(None) => return Ok(None),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Registry unavailable, building locally");
                run.degraded = true;
                return Ok(None);
            }
            Err(e) if e.is_integrity_failure() || matches!(e, WheelsmithError::RegistryProtocol(_)) => {
                warn!(error = %e, "Registry artifact rejected, building locally");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match self
            .cache
            .insert_bytes(&pulled.bytes, &pulled.record.file_name, &run.fingerprint)
            .await
        {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.is_integrity_failure() => {
                warn!(error = %e, "Registry artifact rejected, building locally");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn validate(&self, wheel: &Path) -> WheelsmithResult<()> {
        let path = wheel.to_path_buf();
        let verdict = tokio::task::spawn_blocking(move || ArchiveValidator::new().validate_path(&path))
            .await
            .map_err(|e| WheelsmithError::Internal(format!("validation task failed: {}", e)))?;

        if let Err(rejection) = verdict {
            warn!(wheel = %wheel.display(), reason = %rejection, "Built artifact failed validation");
            self.audit(
                events::VALIDATION_REJECTED,
                serde_json::json!({
                    "file": wheel.display().to_string(),
                    "reason": rejection.to_string(),
                }),
            )
            .await;
            return Err(rejection.into());
        }
        Ok(())
    }

    /// Lease a just-inserted entry so eviction cannot take it
    async fn checkout(&self, entry: &CacheEntry) -> WheelsmithResult<CachedArtifact> {
        self.cache
            .lease(&entry.digest)
            .await?
            .ok_or_else(|| WheelsmithError::EntryNotFound(entry.digest.to_string()))
    }

    async fn evict(&self) {
        if let Err(e) = self.cache.evict_if_over_budget().await {
            warn!(error = %e, "Cache eviction failed");
        }
    }

    async fn publish(
        &self,
        registry: &WheelRegistry,
        artifact: &CachedArtifact,
        run: &mut RunState,
    ) -> WheelsmithResult<()> {
        let bytes = artifact.read().await?;
        match registry
            .push_with_retries(artifact.entry(), &bytes, self.options.push_attempts)
            .await
        {
            Ok(outcome) => {
                debug!(?outcome, "Publish finished");
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Registry unavailable, artifact not published");
                run.degraded = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
