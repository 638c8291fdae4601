//! Identifiers and records exchanged with the registry

use crate::cache::CacheEntry;
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use crate::validate::WheelInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an artifact is addressed in the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    /// Exact artifact bytes
    Digest(Digest),
    /// Latest artifact published for a package release
    Package { name: String, version: String },
    /// Artifact built from the inputs with this build fingerprint
    Source(String),
}

/// Prefix that marks a build fingerprint in an artifact id
const SOURCE_PREFIX: &str = "source:";

/// Fingerprints travel in URL paths, so only a safe alphabet is accepted
fn is_valid_fingerprint(fp: &str) -> bool {
    !fp.is_empty()
        && fp.len() <= 128
        && fp
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && fp != "."
        && fp != ".."
}

impl ArtifactId {
    /// Parse `sha256:<hex>`, `<hex>`, `name==version` or `source:<fingerprint>`
    pub fn parse(s: &str) -> WheelsmithResult<Self> {
        let s = s.trim();
        if let Some(fp) = s.strip_prefix(SOURCE_PREFIX) {
            return Self::source(fp);
        }
        if let Some((name, version)) = s.split_once("==") {
            let (name, version) = (name.trim(), version.trim());
            let valid = |part: &str, extra: &[char]| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') || extra.contains(&c))
            };
            if !valid(name, &[]) || !valid(version, &['+', '!']) {
                return Err(WheelsmithError::InvalidArtifactId(s.to_string()));
            }
            return Ok(Self::Package {
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        Digest::parse(s)
            .map(Self::Digest)
            .map_err(|_| WheelsmithError::InvalidArtifactId(s.to_string()))
    }

    /// Id for the artifact built from `fingerprint`
    pub fn source(fingerprint: &str) -> WheelsmithResult<Self> {
        if !is_valid_fingerprint(fingerprint) {
            return Err(WheelsmithError::InvalidArtifactId(format!(
                "{}{}",
                SOURCE_PREFIX, fingerprint
            )));
        }
        Ok(Self::Source(fingerprint.to_string()))
    }
}

impl FromStr for ArtifactId {
    type Err = WheelsmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digest(d) => write!(f, "{}", d.prefixed()),
            Self::Package { name, version } => write!(f, "{}=={}", name, version),
            Self::Source(fp) => write!(f, "{}{}", SOURCE_PREFIX, fp),
        }
    }
}

/// Normalized project name: lowercase, runs of `-_.` collapsed to `-`
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
        } else {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// Metadata stored next to each uploaded blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub digest: Digest,
    pub name: String,
    pub version: String,
    pub source_spec_hash: String,
    pub size_bytes: u64,
    pub file_name: String,
}

impl RegistryRecord {
    /// Build the record for a cache entry; entries without package
    /// metadata cannot be published by name
    pub fn from_entry(entry: &CacheEntry) -> WheelsmithResult<Self> {
        let package = entry.package.as_ref().ok_or_else(|| {
            WheelsmithError::User(format!(
                "Cache entry {} has no package metadata",
                entry.digest.short()
            ))
        })?;
        Ok(Self {
            digest: entry.digest.clone(),
            name: package.name.clone(),
            version: package.version.clone(),
            source_spec_hash: entry.source_spec_hash.clone(),
            size_bytes: entry.size_bytes,
            file_name: entry.file_name.clone(),
        })
    }
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Uploaded,
    /// The digest already existed remotely; nothing was sent
    AlreadyPresent,
}

/// A verified and validated artifact fetched from the registry
#[derive(Debug, Clone)]
pub struct PulledArtifact {
    pub record: RegistryRecord,
    pub bytes: Vec<u8>,
    pub info: WheelInfo,
}
