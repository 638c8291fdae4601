//! Registry transport abstraction
//!
//! `WheelRegistry` owns the integrity rules; transports only move bytes
//! and records. HTTP is the production transport, the in-memory one
//! backs tests and local mirrors.

use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use crate::registry::types::{normalize_name, ArtifactId, RegistryRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Abstract registry storage interface
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Whether a completed upload with this digest exists remotely.
    /// The digest record is written last, so a blob alone does not count.
    async fn contains(&self, digest: &Digest) -> WheelsmithResult<bool>;

    /// Store the blob and its record, indexed by package release and
    /// build fingerprint, then commit the digest record
    async fn upload(&self, record: &RegistryRecord, bytes: &[u8]) -> WheelsmithResult<()>;

    /// Look up a record; `None` when the registry does not know the id
    async fn resolve(&self, id: &ArtifactId) -> WheelsmithResult<Option<RegistryRecord>>;

    /// Fetch blob bytes; a blob larger than `max_bytes` is a protocol error
    async fn download(&self, digest: &Digest, max_bytes: u64) -> WheelsmithResult<Option<Vec<u8>>>;

    /// Human-readable transport name for display
    fn transport_name(&self) -> &'static str;
}

#[derive(Default)]
struct MemoryStore {
    blobs: HashMap<Digest, Vec<u8>>,
    records: HashMap<Digest, RegistryRecord>,
    packages: HashMap<(String, String), Digest>,
    sources: HashMap<String, Digest>,
}

/// Registry held in process memory
#[derive(Default)]
pub struct MemoryTransport {
    store: Mutex<MemoryStore>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut MemoryStore) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut store)
    }

    /// Store raw bytes and a record without any checks
    pub fn insert_raw(&self, record: RegistryRecord, bytes: Vec<u8>) {
        self.with_store(|s| {
            s.packages.insert(
                (normalize_name(&record.name), record.version.clone()),
                record.digest.clone(),
            );
            if ArtifactId::source(&record.source_spec_hash).is_ok() {
                s.sources
                    .insert(record.source_spec_hash.clone(), record.digest.clone());
            }
            s.blobs.insert(record.digest.clone(), bytes);
            s.records.insert(record.digest.clone(), record);
        });
    }

    /// Store a blob with no record, as an interrupted upload leaves it
    pub fn insert_orphan_blob(&self, digest: Digest, bytes: Vec<u8>) {
        self.with_store(|s| {
            s.blobs.insert(digest, bytes);
        });
    }

    pub fn blob_count(&self) -> usize {
        self.with_store(|s| s.blobs.len())
    }
}

#[async_trait]
impl RegistryTransport for MemoryTransport {
    async fn contains(&self, digest: &Digest) -> WheelsmithResult<bool> {
        Ok(self.with_store(|s| s.records.contains_key(digest)))
    }

    async fn upload(&self, record: &RegistryRecord, bytes: &[u8]) -> WheelsmithResult<()> {
        self.insert_raw(record.clone(), bytes.to_vec());
        Ok(())
    }

    async fn resolve(&self, id: &ArtifactId) -> WheelsmithResult<Option<RegistryRecord>> {
        Ok(self.with_store(|s| {
            let digest = match id {
                ArtifactId::Digest(d) => Some(d.clone()),
                ArtifactId::Package { name, version } => s
                    .packages
                    .get(&(normalize_name(name), version.clone()))
                    .cloned(),
                ArtifactId::Source(fp) => s.sources.get(fp).cloned(),
            };
            digest.and_then(|d| s.records.get(&d).cloned())
        }))
    }

    async fn download(&self, digest: &Digest, max_bytes: u64) -> WheelsmithResult<Option<Vec<u8>>> {
        let blob = self.with_store(|s| s.blobs.get(digest).cloned());
        match blob {
            Some(bytes) if bytes.len() as u64 > max_bytes => Err(WheelsmithError::RegistryProtocol(
                format!("artifact {} exceeds {} byte download limit", digest.short(), max_bytes),
            )),
            other => Ok(other),
        }
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}
