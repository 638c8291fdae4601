//! Persistent entry index
//!
//! The index is a single JSON document replaced by write-to-temp and
//! rename, so readers see either the old or the new version. Writers hold
//! the exclusive index lock from load to rename.

use crate::cache::entry::{CacheEntry, CacheKey};
use crate::cache::layout::CacheLayout;
use crate::hash::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Current index format version
pub const INDEX_VERSION: u32 = 1;

/// Serialized form of `index.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    pub version: u32,
    /// Bumped on every persisted change
    #[serde(default)]
    pub generation: u64,
    pub entries: Vec<CacheEntry>,
    #[serde(default)]
    pub fingerprints: BTreeMap<String, Digest>,
}

impl IndexFile {
    /// Load the index.
    ///
    /// Returns `None` when the file is missing, unparsable, or written by an
    /// unknown format version; the caller rebuilds from the blob area.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache index yet");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read cache index, rebuilding");
                return None;
            }
        };

        match serde_json::from_slice::<IndexFile>(&bytes) {
            Ok(index) if index.version == INDEX_VERSION => Some(index),
            Ok(index) => {
                warn!(version = index.version, "Unsupported cache index version, rebuilding");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache index, rebuilding");
                None
            }
        }
    }

    /// Write the index atomically via a temp file in `staging_dir`
    pub fn save(&self, path: &Path, staging_dir: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        let mut tmp = NamedTempFile::new_in(staging_dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        debug!(
            path = %path.display(),
            generation = self.generation,
            entries = self.entries.len(),
            "Saved cache index"
        );
        Ok(())
    }
}

/// Working copy of the index
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: HashMap<Digest, CacheEntry>,
    fingerprints: HashMap<String, Digest>,
    generation: u64,
    changed: bool,
}

impl Index {
    /// Accept a loaded index file.
    ///
    /// Entries whose `storage_path` is not the canonical blob location for
    /// their digest are dropped, so nothing read from disk can point a
    /// removal outside the blob area.
    pub fn from_file(file: IndexFile, layout: &CacheLayout) -> Self {
        let mut changed = false;
        let mut entries = HashMap::with_capacity(file.entries.len());
        for entry in file.entries {
            if entry.storage_path != layout.blob_relative(&entry.digest) {
                warn!(
                    digest = %entry.digest.short(),
                    path = %entry.storage_path.display(),
                    "Dropping index entry with unexpected storage path"
                );
                changed = true;
                continue;
            }
            entries.insert(entry.digest.clone(), entry);
        }
        let fingerprints: HashMap<String, Digest> = file
            .fingerprints
            .into_iter()
            .filter(|(_, d)| entries.contains_key(d))
            .collect();
        Self {
            entries,
            fingerprints,
            generation: file.generation,
            changed,
        }
    }

    pub fn to_file(&self) -> IndexFile {
        let mut entries: Vec<CacheEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.digest.cmp(&b.digest));
        IndexFile {
            version: INDEX_VERSION,
            generation: self.generation,
            entries,
            fingerprints: self
                .fingerprints
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Whether a mutation happened since load
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub(crate) fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, digest: &Digest) -> Option<&CacheEntry> {
        self.entries.get(digest)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.entries.keys()
    }

    pub fn resolve(&self, key: &CacheKey) -> Option<&CacheEntry> {
        let digest = match key {
            CacheKey::Digest(d) => d,
            CacheKey::Fingerprint(fp) => self.fingerprints.get(fp)?,
        };
        self.entries.get(digest)
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.digest.clone(), entry);
        self.changed = true;
    }

    /// Point `fingerprint` at `digest`; empty fingerprints are ignored
    pub fn set_fingerprint(&mut self, fingerprint: &str, digest: &Digest) {
        if fingerprint.is_empty() || self.fingerprints.get(fingerprint) == Some(digest) {
            return;
        }
        self.fingerprints
            .insert(fingerprint.to_string(), digest.clone());
        self.changed = true;
    }

    /// Remove an entry and every fingerprint that points at it
    pub fn remove(&mut self, digest: &Digest) -> Option<CacheEntry> {
        let removed = self.entries.remove(digest)?;
        self.fingerprints.retain(|_, d| d != digest);
        self.changed = true;
        Some(removed)
    }

    /// Record an access without counting it as a structural change
    pub fn touch(&mut self, digest: &Digest, at: DateTime<Utc>) -> Option<&CacheEntry> {
        let entry = self.entries.get_mut(digest)?;
        entry.last_accessed_at = at;
        Some(entry)
    }

    /// Carry over access times from `other` that are newer than ours.
    ///
    /// Returns whether any were newer.
    pub fn merge_access_times(&mut self, other: &Index) -> bool {
        let mut newer = false;
        for (digest, entry) in self.entries.iter_mut() {
            if let Some(theirs) = other.entries.get(digest) {
                if theirs.last_accessed_at > entry.last_accessed_at {
                    entry.last_accessed_at = theirs.last_accessed_at;
                    newer = true;
                }
            }
        }
        newer
    }

    /// Entries from least to most recently used.
    ///
    /// Ties on `last_accessed_at` fall back to `created_at`, then digest.
    pub fn lru_order(&self) -> Vec<&CacheEntry> {
        let mut order: Vec<&CacheEntry> = self.entries.values().collect();
        order.sort_by(|a, b| {
            (a.last_accessed_at, a.created_at, &a.digest).cmp(&(
                b.last_accessed_at,
                b.created_at,
                &b.digest,
            ))
        });
        order
    }
}
