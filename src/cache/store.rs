//! Content-addressed artifact store with LRU eviction
//!
//! Blobs are immutable files named by their digest. `index.json` maps
//! digests and build fingerprints to entries and may be shared by several
//! processes on one cache root:
//!
//! - Every index change is a transaction: take the exclusive index lock,
//!   reload the file, apply the change, write it back.
//! - A miss re-reads the index before it is reported, so entries added by
//!   other processes are found.
//! - Leases are shared locks on the blob file and hold in every process.
//!
//! The in-memory copy sits behind an `RwLock` that is held only to read or
//! swap it; hashing, validation and file I/O happen outside it.

use crate::audit::{events, AuditLog};
use crate::cache::entry::{CacheEntry, CacheKey, CacheStats, PackageId};
use crate::cache::index::{Index, IndexFile};
use crate::cache::layout::CacheLayout;
use crate::cache::lock::{self, BlobLease, BlobRemoval, IndexLock, StagingDir};
use crate::cleanup::remove_dir_guarded;
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use crate::validate::{safe_file_name, ArchiveValidator, WheelInfo};
use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

/// Staging files older than this are considered abandoned
const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// Size and behaviour limits for a cache instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Total blob bytes allowed, 0 = unlimited
    pub max_total_bytes: u64,
    /// Entry count allowed, 0 = unlimited
    pub max_entries: usize,
    /// Re-hash blobs before serving them
    pub verify_on_lookup: bool,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_total_bytes: 0,
            max_entries: 0,
            verify_on_lookup: true,
        }
    }
}

impl CacheLimits {
    fn is_unbounded(&self) -> bool {
        self.max_total_bytes == 0 && self.max_entries == 0
    }

    fn exceeded(&self, total_bytes: u64, count: usize) -> bool {
        (self.max_total_bytes > 0 && total_bytes > self.max_total_bytes)
            || (self.max_entries > 0 && count > self.max_entries)
    }
}

/// Outcome of an eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Evicted digests, in eviction order
    pub evicted: Vec<Digest>,
    pub bytes_freed: u64,
}

/// Outcome of reconciling the index with the blob area
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub missing_dropped: usize,
    pub orphans_adopted: usize,
    pub orphans_deleted: usize,
    pub stale_staging_removed: usize,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// A cache hit; holds a lease that keeps every process's eviction away
/// from the blob
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    entry: CacheEntry,
    path: PathBuf,
    _lease: Arc<BlobLease>,
}

impl CachedArtifact {
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    pub fn digest(&self) -> &Digest {
        &self.entry.digest
    }

    /// Absolute path of the blob
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the artifact into `dir` under its wheel file name
    pub async fn copy_to(&self, dir: &Path) -> WheelsmithResult<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| WheelsmithError::io(format!("creating {}", dir.display()), e))?;

        let name = safe_file_name(&self.entry.file_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.whl", self.entry.digest));
        let dest = dir.join(name);

        tokio::fs::copy(&self.path, &dest).await.map_err(|e| {
            WheelsmithError::io(format!("copying artifact to {}", dest.display()), e)
        })?;
        Ok(dest)
    }

    /// Read the artifact bytes
    pub async fn read(&self) -> WheelsmithResult<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| WheelsmithError::io(format!("reading {}", self.path.display()), e))
    }
}

#[derive(Default)]
struct CacheState {
    index: Index,
    /// Access times newer than the index file
    dirty: bool,
}

impl CacheState {
    /// Adopt an index just read or written, keeping access times recorded
    /// here since it was read
    fn install(&mut self, mut fresh: Index) {
        self.dirty = fresh.merge_access_times(&self.index);
        fresh.clear_changed();
        self.index = fresh;
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corruptions: AtomicU64,
}

/// Wall clock that never repeats or goes backwards within a process,
/// so LRU order is total even when accesses land in the same tick.
#[derive(Debug)]
struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + chrono::Duration::nanoseconds(1)
        };
        *last = next;
        next
    }
}

/// Bytes staged in `tmp/` and hashed on the way in
struct Staged {
    file: NamedTempFile,
    digest: Digest,
    size: u64,
}

/// Writer that hashes everything passing through it
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// The wrapped writer, the digest and the byte count
    fn finish(self) -> WheelsmithResult<(W, Digest, u64)> {
        let digest = Digest::parse(&hex::encode(self.hasher.finalize()))?;
        Ok((self.inner, digest, self.written))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// What `clear` managed to do before it stopped
#[derive(Default)]
struct ClearOutcome {
    removed: usize,
    kept: usize,
    failure: Option<WheelsmithError>,
}

async fn blocking<T, F>(f: F) -> WheelsmithResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WheelsmithError::Internal(format!("blocking task failed: {}", e)))
}

/// Re-hash a blob; `Err` carries the reason it is unusable
fn check_blob(path: &Path, expected: &Digest) -> Result<(), String> {
    match Digest::of_file(path) {
        Ok(actual) if actual == *expected => Ok(()),
        Ok(actual) => Err(format!("content hashes to {}", actual.short())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err("blob is missing".to_string()),
        Err(e) => Err(format!("blob unreadable: {}", e)),
    }
}

/// Move a staged file into the blob area without clobbering.
///
/// A pre-existing blob with the right content is kept; one with the wrong
/// content is replaced.
fn publish_blob(staged: NamedTempFile, digest: &Digest, blob_path: &Path) -> WheelsmithResult<()> {
    if let Some(shard) = blob_path.parent() {
        std::fs::create_dir_all(shard).map_err(|e| {
            WheelsmithError::storage(format!("creating {}", shard.display()), e)
        })?;
    }

    match staged.persist_noclobber(blob_path) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            match check_blob(blob_path, digest) {
                Ok(()) => {
                    debug!(digest = %digest.short(), "Adopting existing blob");
                    Ok(())
                }
                Err(reason) => {
                    warn!(digest = %digest.short(), reason, "Replacing damaged blob");
                    e.file
                        .persist(blob_path)
                        .map(|_| ())
                        .map_err(|e| WheelsmithError::storage("publishing artifact", e.error))
                }
            }
        }
        Err(e) => Err(WheelsmithError::storage("publishing artifact", e.error)),
    }
}

/// Local content-addressed artifact cache
pub struct ArtifactCache {
    layout: CacheLayout,
    limits: CacheLimits,
    validator: ArchiveValidator,
    state: RwLock<CacheState>,
    /// Serializes this process's index transactions and reloads
    writer: AsyncMutex<()>,
    counters: Counters,
    clock: MonotonicClock,
    audit: Option<AuditLog>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("root", &self.layout.root())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    /// Open (or create) a cache rooted at `root`.
    ///
    /// A missing or unreadable index is rebuilt from the blob area; the
    /// index and blobs are then reconciled with [`ArtifactCache::sweep`].
    pub async fn open(root: impl Into<PathBuf>, limits: CacheLimits) -> WheelsmithResult<Self> {
        Self::open_with_audit(root, limits, None).await
    }

    /// Open a cache that records integrity events in `audit`
    pub async fn open_with_audit(
        root: impl Into<PathBuf>,
        limits: CacheLimits,
        audit: Option<AuditLog>,
    ) -> WheelsmithResult<Self> {
        let layout = CacheLayout::new(root);
        let ensure_layout = layout.clone();
        blocking(move || ensure_layout.ensure()).await??;

        if !layout.index_path().is_file() {
            info!(root = %layout.root().display(), "Rebuilding cache index from blobs");
        }

        let cache = Self {
            layout,
            limits,
            validator: ArchiveValidator::new(),
            state: RwLock::new(CacheState::default()),
            writer: AsyncMutex::new(()),
            counters: Counters::default(),
            clock: MonotonicClock::new(),
            audit,
        };

        let report = cache.sweep().await?;
        if !report.is_clean() {
            info!(?report, "Reconciled cache index with blob area");
        }

        debug!(
            root = %cache.layout.root().display(),
            entries = cache.state.read().await.index.len(),
            "Opened artifact cache"
        );
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }

    async fn audit(&self, event: &str, data: serde_json::Value) {
        if let Some(audit) = &self.audit {
            audit.log(event, &data).await;
        }
    }

    /// Run `f` against the on-disk index under the exclusive index lock.
    ///
    /// The index is written back when `f` changed it or when this process
    /// holds newer access times, whether or not `f` succeeded. `f` runs on
    /// the blocking pool and may do file I/O.
    async fn transact<T, F>(&self, f: F) -> WheelsmithResult<T>
    where
        F: FnOnce(&mut Index) -> WheelsmithResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let _writer = self.writer.lock().await;
        let snapshot = self.state.read().await.index.clone();
        let layout = self.layout.clone();

        let (index, result) = blocking(move || -> WheelsmithResult<_> {
            let _lock = IndexLock::exclusive(&layout.lock_path())?;
            let mut index = match IndexFile::load(&layout.index_path()) {
                Some(file) => Index::from_file(file, &layout),
                None => {
                    let mut index = snapshot.clone();
                    index.mark_changed();
                    index
                }
            };
            let newer_access = index.merge_access_times(&snapshot);

            let result = f(&mut index);

            if index.is_changed() || newer_access {
                index.set_generation(index.generation() + 1);
                index
                    .to_file()
                    .save(&layout.index_path(), &layout.tmp_dir())
                    .map_err(|e| WheelsmithError::storage("persisting cache index", e))?;
            }
            Ok((index, result))
        })
        .await??;

        self.state.write().await.install(index);
        result
    }

    /// Re-read the index written by other processes
    async fn refresh(&self) -> WheelsmithResult<()> {
        let _writer = self.writer.lock().await;
        let layout = self.layout.clone();
        let loaded = blocking(move || -> WheelsmithResult<Option<Index>> {
            let _lock = IndexLock::shared(&layout.lock_path())?;
            Ok(IndexFile::load(&layout.index_path()).map(|file| Index::from_file(file, &layout)))
        })
        .await??;

        if let Some(index) = loaded {
            self.state.write().await.install(index);
        }
        Ok(())
    }

    async fn refresh_or_warn(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Failed to reload cache index");
        }
    }

    async fn resolve(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.read().await.index.resolve(key).cloned()
    }

    fn miss(&self, key: &CacheKey) -> WheelsmithResult<Option<CachedArtifact>> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(%key, "Cache miss");
        Ok(None)
    }

    /// Find an artifact by digest or build fingerprint.
    ///
    /// Returns `Ok(None)` on a miss and `CorruptEntry` when the stored bytes
    /// no longer match their digest; the corrupt entry is evicted, so the
    /// next lookup misses. A blob removed by another process's purge or
    /// eviction is a miss.
    pub async fn lookup(&self, key: &CacheKey) -> WheelsmithResult<Option<CachedArtifact>> {
        let mut found = self.resolve(key).await;
        if found.is_none() {
            self.refresh_or_warn().await;
            found = self.resolve(key).await;
        }
        let Some(entry) = found else {
            return self.miss(key);
        };

        let path = self.layout.blob_path(&entry.digest);
        let lease_path = path.clone();
        let lease = blocking(move || lock::lease_blob(&lease_path))
            .await?
            .map_err(|e| {
                WheelsmithError::storage(format!("opening blob {}", entry.digest.short()), e)
            })?;

        let Some(lease) = lease else {
            self.refresh_or_warn().await;
            if !self.state.read().await.index.contains(&entry.digest) {
                // Removed by another process
                return self.miss(key);
            }
            let reason = "blob is missing".to_string();
            self.evict_corrupt(&entry.digest, &reason).await;
            return Err(WheelsmithError::CorruptEntry {
                digest: entry.digest.to_string(),
                reason,
            });
        };

        if self.limits.verify_on_lookup {
            let (p, d) = (path.clone(), entry.digest.clone());
            if let Err(reason) = blocking(move || check_blob(&p, &d)).await? {
                drop(lease);
                self.evict_corrupt(&entry.digest, &reason).await;
                return Err(WheelsmithError::CorruptEntry {
                    digest: entry.digest.to_string(),
                    reason,
                });
            }
        }

        let touched = {
            let mut state = self.state.write().await;
            let touched = state.index.touch(&entry.digest, self.clock.now()).cloned();
            if touched.is_some() {
                state.dirty = true;
            }
            touched
        };
        let Some(entry) = touched else {
            // Dropped by a concurrent reload
            return self.miss(key);
        };

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(%key, digest = %entry.digest.short(), "Cache hit");
        Ok(Some(CachedArtifact {
            entry,
            path,
            _lease: Arc::new(lease),
        }))
    }

    /// Drop a corrupt entry and its blob
    async fn evict_corrupt(&self, digest: &Digest, reason: &str) {
        self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
        warn!(digest = %digest, reason, "Corrupt cache entry, evicting");

        let target = digest.clone();
        let path = self.layout.blob_path(digest);
        let result = self
            .transact(move |index| {
                if index.remove(&target).is_some() {
                    match lock::remove_unleased_blob(&path) {
                        Ok(BlobRemoval::Removed) => {}
                        Ok(BlobRemoval::InUse) => {
                            debug!(digest = %target.short(), "Corrupt blob still leased, leaving it to sweep")
                        }
                        Err(e) => {
                            warn!(digest = %target.short(), error = %e, "Failed to remove corrupt blob")
                        }
                    }
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist cache index");
        }

        self.audit(
            events::CACHE_CORRUPT,
            serde_json::json!({ "digest": digest.as_str(), "reason": reason }),
        )
        .await;
    }

    /// Validate and store a wheel file.
    ///
    /// Byte-identical artifacts collapse onto one entry; the existing entry
    /// is returned and `source_spec_hash` is recorded as another fingerprint
    /// for it.
    pub async fn insert(
        &self,
        candidate: &Path,
        source_spec_hash: &str,
    ) -> WheelsmithResult<CacheEntry> {
        let file_name = candidate
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact.whl".to_string());

        let src = candidate.to_path_buf();
        let tmp_dir = self.layout.tmp_dir();
        let staged = blocking(move || -> WheelsmithResult<Staged> {
            let mut input = File::open(&src)
                .map_err(|e| WheelsmithError::io(format!("opening {}", src.display()), e))?;
            let file = NamedTempFile::new_in(&tmp_dir)
                .map_err(|e| WheelsmithError::storage("creating staging file", e))?;
            let mut writer = HashingWriter::new(file);
            io::copy(&mut input, &mut writer)
                .map_err(|e| WheelsmithError::storage("staging artifact", e))?;
            writer
                .flush()
                .map_err(|e| WheelsmithError::storage("staging artifact", e))?;
            let (file, digest, size) = writer.finish()?;
            Ok(Staged { file, digest, size })
        })
        .await??;

        self.admit(staged, file_name, source_spec_hash).await
    }

    /// Validate and store wheel bytes held in memory
    pub async fn insert_bytes(
        &self,
        bytes: &[u8],
        file_name: &str,
        source_spec_hash: &str,
    ) -> WheelsmithResult<CacheEntry> {
        let data = bytes.to_vec();
        let tmp_dir = self.layout.tmp_dir();
        let staged = blocking(move || -> WheelsmithResult<Staged> {
            let mut file = NamedTempFile::new_in(&tmp_dir)
                .map_err(|e| WheelsmithError::storage("creating staging file", e))?;
            file.write_all(&data)
                .map_err(|e| WheelsmithError::storage("staging artifact", e))?;
            Ok(Staged {
                file,
                digest: Digest::of_bytes(&data),
                size: data.len() as u64,
            })
        })
        .await??;

        self.admit(staged, file_name.to_string(), source_spec_hash)
            .await
    }

    async fn admit(
        &self,
        staged: Staged,
        file_name: String,
        source_spec_hash: &str,
    ) -> WheelsmithResult<CacheEntry> {
        let validator = self.validator.clone();
        let staged_path = staged.file.path().to_path_buf();
        let info = match blocking(move || validator.validate_path(&staged_path)).await? {
            Ok(info) => info,
            Err(rejection) => {
                warn!(file = %file_name, reason = %rejection, "Rejected artifact");
                self.audit(
                    events::VALIDATION_REJECTED,
                    serde_json::json!({
                        "file": file_name,
                        "digest": staged.digest.as_str(),
                        "reason": rejection.to_string(),
                    }),
                )
                .await;
                return Err(rejection.into());
            }
        };

        let now = self.clock.now();
        let candidate = CacheEntry {
            digest: staged.digest.clone(),
            source_spec_hash: source_spec_hash.to_string(),
            created_at: now,
            last_accessed_at: now,
            size_bytes: staged.size,
            storage_path: self.layout.blob_relative(&staged.digest),
            file_name: entry_file_name(&file_name, &staged.digest, &info),
            package: Some(PackageId {
                name: info.name,
                version: info.version,
            }),
        };
        let fingerprint = source_spec_hash.to_string();
        let blob_path = self.layout.blob_path(&staged.digest);

        // A blob published here but not indexed is adopted by the next sweep
        let (entry, created) = self
            .transact(move |index| {
                if let Some(existing) = index.get(&candidate.digest).cloned() {
                    debug!(digest = %existing.digest.short(), "Artifact already cached");
                    index.set_fingerprint(&fingerprint, &existing.digest);
                    return Ok((existing, false));
                }
                publish_blob(staged.file, &candidate.digest, &blob_path)?;
                index.set_fingerprint(&fingerprint, &candidate.digest);
                index.insert(candidate.clone());
                Ok((candidate, true))
            })
            .await?;

        if created {
            info!(
                digest = %entry.digest.short(),
                name = %entry.display_name(),
                size = entry.size_bytes,
                "Cached artifact"
            );
        }
        Ok(entry)
    }

    /// Evict least recently used entries until the cache fits its limits.
    ///
    /// Order is oldest `last_accessed_at`, then oldest `created_at`, then
    /// digest. Entries leased by any process are skipped.
    pub async fn evict_if_over_budget(&self) -> WheelsmithResult<EvictionReport> {
        if self.limits.is_unbounded() {
            return Ok(EvictionReport::default());
        }

        let limits = self.limits;
        let layout = self.layout.clone();
        let report = self
            .transact(move |index| {
                let mut report = EvictionReport::default();
                let mut skipped: HashSet<Digest> = HashSet::new();

                while limits.exceeded(index.total_bytes(), index.len()) {
                    let victim = index
                        .lru_order()
                        .into_iter()
                        .find(|e| !skipped.contains(&e.digest))
                        .cloned();
                    let Some(victim) = victim else {
                        warn!("Cache over budget but every remaining entry is in use");
                        break;
                    };

                    match lock::remove_unleased_blob(&layout.blob_path(&victim.digest)) {
                        Ok(BlobRemoval::Removed) => {}
                        Ok(BlobRemoval::InUse) => {
                            debug!(digest = %victim.digest.short(), "Skipping leased entry");
                            skipped.insert(victim.digest);
                            continue;
                        }
                        Err(e) => {
                            warn!(digest = %victim.digest.short(), error = %e, "Failed to evict blob");
                            skipped.insert(victim.digest);
                            continue;
                        }
                    }

                    index.remove(&victim.digest);
                    debug!(digest = %victim.digest.short(), size = victim.size_bytes, "Evicted entry");
                    report.bytes_freed += victim.size_bytes;
                    report.evicted.push(victim.digest);
                }
                Ok(report)
            })
            .await?;

        if !report.evicted.is_empty() {
            self.counters
                .evictions
                .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
            info!(
                count = report.evicted.len(),
                bytes = report.bytes_freed,
                "Evicted cache entries"
            );
        }
        Ok(report)
    }

    /// Entries the next eviction pass would remove, in eviction order
    pub async fn eviction_candidates(&self) -> WheelsmithResult<Vec<CacheEntry>> {
        self.eviction_plan(&HashSet::new()).await
    }

    /// Eviction order assuming the `excluded` entries are already gone
    pub async fn eviction_plan(
        &self,
        excluded: &HashSet<Digest>,
    ) -> WheelsmithResult<Vec<CacheEntry>> {
        if self.limits.is_unbounded() {
            return Ok(Vec::new());
        }

        let index = self.state.read().await.index.clone();
        let limits = self.limits;
        let layout = self.layout.clone();
        let excluded = excluded.clone();
        blocking(move || {
            let remaining = index.entries().filter(|e| !excluded.contains(&e.digest));
            let (mut total, mut count) =
                remaining.fold((0u64, 0usize), |(t, c), e| (t + e.size_bytes, c + 1));

            let mut plan = Vec::new();
            for entry in index.lru_order() {
                if !limits.exceeded(total, count) {
                    break;
                }
                if excluded.contains(&entry.digest)
                    || lock::blob_in_use(&layout.blob_path(&entry.digest))
                {
                    continue;
                }
                total = total.saturating_sub(entry.size_bytes);
                count -= 1;
                plan.push(entry.clone());
            }
            plan
        })
        .await
    }

    /// Snapshot of counters and contents
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            entry_count: state.index.len(),
            total_size_bytes: state.index.total_bytes(),
            hit_count: self.counters.hits.load(Ordering::Relaxed),
            miss_count: self.counters.misses.load(Ordering::Relaxed),
            eviction_count: self.counters.evictions.load(Ordering::Relaxed),
            corruption_count: self.counters.corruptions.load(Ordering::Relaxed),
        }
    }

    /// Re-hash an entry's blob; a mismatch evicts the entry and returns false
    pub async fn verify_integrity(&self, entry: &CacheEntry) -> WheelsmithResult<bool> {
        let path = self.layout.blob_path(&entry.digest);
        let digest = entry.digest.clone();
        match blocking(move || check_blob(&path, &digest)).await? {
            Ok(()) => Ok(true),
            Err(reason) => {
                self.evict_corrupt(&entry.digest, &reason).await;
                Ok(false)
            }
        }
    }

    /// All entries, most recently used first
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<CacheEntry> = state.index.entries().cloned().collect();
        entries.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        entries
    }

    /// Lease an entry without verifying it or touching counters.
    ///
    /// `None` when the entry or its blob is gone.
    pub async fn lease(&self, digest: &Digest) -> WheelsmithResult<Option<CachedArtifact>> {
        let Some(entry) = self.get(digest).await else {
            return Ok(None);
        };
        let path = self.layout.blob_path(digest);
        let lease_path = path.clone();
        let lease = blocking(move || lock::lease_blob(&lease_path))
            .await?
            .map_err(|e| WheelsmithError::storage(format!("opening blob {}", digest.short()), e))?;
        Ok(lease.map(|lease| CachedArtifact {
            entry,
            path,
            _lease: Arc::new(lease),
        }))
    }

    /// Scratch directory on the same filesystem as the blobs.
    ///
    /// Locked for its whole life and removed on drop.
    pub fn staging_workspace(&self, prefix: &str) -> WheelsmithResult<StagingDir> {
        StagingDir::new_in(&self.layout.tmp_dir(), prefix)
    }

    /// Entry for a digest without touching access time or counters
    pub async fn get(&self, digest: &Digest) -> Option<CacheEntry> {
        self.state.read().await.index.get(digest).cloned()
    }

    /// Remove one entry explicitly
    pub async fn purge(&self, digest: &Digest) -> WheelsmithResult<CacheEntry> {
        let target = digest.clone();
        let path = self.layout.blob_path(digest);
        let entry = self
            .transact(move |index| {
                let entry = index
                    .get(&target)
                    .cloned()
                    .ok_or_else(|| WheelsmithError::EntryNotFound(target.to_string()))?;
                let removal = lock::remove_unleased_blob(&path).map_err(|e| {
                    WheelsmithError::storage(format!("removing blob {}", target.short()), e)
                })?;
                if removal == BlobRemoval::InUse {
                    return Err(WheelsmithError::EntryInUse(target.to_string()));
                }
                index.remove(&target);
                Ok(entry)
            })
            .await?;

        info!(digest = %digest.short(), "Purged cache entry");
        Ok(entry)
    }

    /// Drop every unleased entry. Returns the number removed.
    ///
    /// Each entry leaves the index as soon as its blob is gone, so a failure
    /// part way keeps the index consistent with the blob area. With no
    /// leases outstanding the whole blob area is removed through the cleanup
    /// guard and recreated.
    pub async fn clear(&self) -> WheelsmithResult<usize> {
        let layout = self.layout.clone();
        let outcome = self
            .transact(move |index| {
                let mut outcome = ClearOutcome::default();
                let mut digests: Vec<Digest> = index.digests().cloned().collect();
                digests.sort();

                for digest in digests {
                    match lock::remove_unleased_blob(&layout.blob_path(&digest)) {
                        Ok(BlobRemoval::Removed) => {
                            index.remove(&digest);
                            outcome.removed += 1;
                        }
                        Ok(BlobRemoval::InUse) => outcome.kept += 1,
                        Err(e) => {
                            warn!(digest = %digest.short(), error = %e, "Failed to remove blob");
                            if outcome.failure.is_none() {
                                outcome.failure = Some(WheelsmithError::storage(
                                    format!("removing blob {}", digest.short()),
                                    e,
                                ));
                            }
                        }
                    }
                }

                if outcome.failure.is_none() && outcome.kept == 0 {
                    let blobs = layout.blobs_dir();
                    let wiped = remove_dir_guarded(&blobs).and_then(|()| {
                        std::fs::create_dir_all(&blobs).map_err(|e| {
                            WheelsmithError::storage(format!("creating {}", blobs.display()), e)
                        })
                    });
                    outcome.failure = wiped.err();
                }
                Ok(outcome)
            })
            .await?;

        if let Some(failure) = outcome.failure {
            if matches!(failure, WheelsmithError::DangerousCleanupRefused { .. }) {
                self.audit(
                    events::CLEANUP_REFUSED,
                    serde_json::json!({ "path": self.layout.blobs_dir().display().to_string() }),
                )
                .await;
            }
            return Err(failure);
        }

        info!(removed = outcome.removed, kept = outcome.kept, "Cleared cache");
        Ok(outcome.removed)
    }

    /// Reconcile the index with the blob area.
    ///
    /// Entries whose blob vanished are dropped. Blobs with no entry are
    /// adopted when they hash to their name and pass validation, and deleted
    /// otherwise. Abandoned staging items are removed.
    pub async fn sweep(&self) -> WheelsmithResult<SweepReport> {
        let layout = self.layout.clone();
        let validator = self.validator.clone();
        let now = self.clock.now();

        let mut report = self
            .transact(move |index| {
                let mut report = SweepReport::default();

                let missing: Vec<Digest> = index
                    .entries()
                    .filter(|e| !layout.blob_path(&e.digest).is_file())
                    .map(|e| e.digest.clone())
                    .collect();
                for digest in &missing {
                    warn!(digest = %digest.short(), "Cache entry has no blob, dropping");
                    index.remove(digest);
                }
                report.missing_dropped = missing.len();

                for (digest, path) in layout.scan_blobs() {
                    if index.contains(&digest) {
                        continue;
                    }
                    let verdict = check_blob(&path, &digest).and_then(|()| {
                        validator.validate_path(&path).map_err(|e| e.to_string())
                    });
                    match verdict {
                        Ok(info) => {
                            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                            debug!(digest = %digest.short(), "Adopted orphan blob");
                            index.insert(CacheEntry {
                                storage_path: layout.blob_relative(&digest),
                                file_name: entry_file_name("", &digest, &info),
                                package: Some(PackageId {
                                    name: info.name,
                                    version: info.version,
                                }),
                                digest,
                                source_spec_hash: String::new(),
                                created_at: now,
                                last_accessed_at: now,
                                size_bytes: size,
                            });
                            report.orphans_adopted += 1;
                        }
                        Err(reason) => {
                            warn!(digest = %digest.short(), reason, "Deleting unverifiable orphan blob");
                            match lock::remove_unleased_blob(&path) {
                                Ok(BlobRemoval::Removed) => report.orphans_deleted += 1,
                                Ok(BlobRemoval::InUse) => {
                                    debug!(digest = %digest.short(), "Orphan blob is leased, keeping")
                                }
                                Err(e) => warn!(error = %e, "Failed to delete orphan blob"),
                            }
                        }
                    }
                }
                Ok(report)
            })
            .await?;

        let tmp_dir = self.layout.tmp_dir();
        let cutoff = SystemTime::now()
            .checked_sub(STALE_STAGING_AGE)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        report.stale_staging_removed =
            blocking(move || remove_stale_staging(&tmp_dir, cutoff)).await?;

        Ok(report)
    }

    /// Persist access times recorded since the last index write
    pub async fn flush(&self) -> WheelsmithResult<()> {
        if !self.state.read().await.dirty {
            return Ok(());
        }
        self.transact(|_| Ok(())).await
    }

    /// Flush and release the cache
    pub async fn close(self) -> WheelsmithResult<()> {
        self.flush().await
    }
}

/// File name recorded for an entry; untrusted names fall back to one
/// derived from the archive metadata and digest.
fn entry_file_name(candidate: &str, digest: &Digest, info: &WheelInfo) -> String {
    match safe_file_name(candidate) {
        Some(name) => name.to_string(),
        None => format!(
            "{}-{}-{}.whl",
            info.name.replace('-', "_"),
            info.version,
            digest.short()
        ),
    }
}

/// Remove staging items last modified before `cutoff`.
///
/// Directories whose owner still holds their lock are kept whatever their
/// age.
fn remove_stale_staging(tmp_dir: &Path, cutoff: SystemTime) -> usize {
    let Ok(entries) = std::fs::read_dir(tmp_dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.modified().is_ok_and(|m| m < cutoff) {
            continue;
        }
        let path = entry.path();
        let gone = if meta.is_dir() {
            if lock::staging_dir_in_use(&path) {
                debug!(path = %path.display(), "Staging directory still in use");
                continue;
            }
            remove_dir_guarded(&path).is_ok()
        } else {
            std::fs::remove_file(&path).is_ok()
        };
        if gone {
            debug!(path = %path.display(), "Removed stale staging item");
            removed += 1;
        }
    }
    removed
}
