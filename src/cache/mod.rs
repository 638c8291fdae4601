//! Local artifact cache
//!
//! Content-addressed storage for built wheels, keyed by the SHA-256 of the
//! artifact bytes and indexed by the fingerprint of the build inputs.
//!
//! # Integrity Model
//!
//! - Every artifact is validated before it is admitted
//! - Blobs are named by their digest and never modified in place
//! - Blobs are re-hashed on lookup; a mismatch evicts the entry
//! - Orphan blobs are adopted only after re-hashing and validation
//!
//! # Entry Lifecycle
//!
//! | Event | Effect |
//! |-------|--------|
//! | Insert | Staged in `tmp/`, validated, renamed into `blobs/` |
//! | Hit | `last_accessed_at` updated, shared lock taken on the blob |
//! | Over budget | Least recently used entries without a lease evicted |
//! | Corruption | Entry and blob dropped, audited |
//!
//! Several processes may share one cache root. Index rewrites are
//! serialized by `index.lock`; see [`lock`] for the full set of locks.

pub mod entry;
pub mod fingerprint;
pub mod index;
pub mod layout;
pub mod lock;
pub mod store;

pub use entry::{
    format_bytes, mb_to_bytes, CacheEntry, CacheKey, CacheSizeStatus, CacheStats, PackageId,
};
pub use fingerprint::{hash_source_tree, BuildFingerprint, FingerprintPolicy};
pub use layout::CacheLayout;
pub use lock::StagingDir;
pub use store::{ArtifactCache, CacheLimits, CachedArtifact, EvictionReport, SweepReport};
