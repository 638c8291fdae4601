//! Build fingerprints for cache lookup before building
//!
//! A fingerprint identifies the inputs of a build: project identity, the
//! source tree contents, and optionally the toolchain, platform, and a set
//! of environment variables. Same inputs = same fingerprint = cache hit
//! without invoking the build backend.

use crate::build::{ProjectMetadata, ResolvedSource};
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Directory names never included in the source tree hash
const SKIPPED_DIRS: &[&str] = &[".git", "__pycache__", "build", "dist", ".tox", ".venv"];

/// File extensions never included in the source tree hash
const SKIPPED_EXTENSIONS: &[&str] = &["pyc"];

/// Which build inputs feed the fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FingerprintPolicy {
    /// Include the builder identity and wheelsmith version
    pub include_tool_version: bool,
    /// Include target OS and architecture
    pub include_platform: bool,
    /// Environment variables whose values affect the build
    pub env_vars: Vec<String>,
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self {
            include_tool_version: true,
            include_platform: true,
            env_vars: Vec::new(),
        }
    }
}

/// Content-addressed identity of a build's inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFingerprint {
    value: String,
    components: Vec<(String, String)>,
}

impl BuildFingerprint {
    /// Compute the fingerprint for a build
    pub fn compute(
        project: &ProjectMetadata,
        source: &ResolvedSource,
        builder_id: &str,
        policy: &FingerprintPolicy,
    ) -> WheelsmithResult<Self> {
        let source_hash = match &source.content_hash {
            Some(hash) => hash.clone(),
            None => hash_source_tree(&source.path)?.to_string(),
        };

        let mut components = vec![
            ("name".to_string(), project.name.clone()),
            ("version".to_string(), project.version.clone()),
            ("source".to_string(), source_hash),
        ];

        if policy.include_tool_version {
            components.push(("builder".to_string(), builder_id.to_string()));
            components.push(("tool".to_string(), env!("CARGO_PKG_VERSION").to_string()));
        }

        if policy.include_platform {
            components.push((
                "platform".to_string(),
                format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            ));
        }

        let mut vars = policy.env_vars.clone();
        vars.sort();
        vars.dedup();
        for var in vars {
            let value = std::env::var(&var).unwrap_or_default();
            components.push((format!("env:{}", var), value));
        }

        Ok(Self::from_components(components))
    }

    fn from_components(components: Vec<(String, String)>) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in &components {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        let value = hex::encode(hasher.finalize());
        debug!(fingerprint = %value, "Computed build fingerprint");
        Self { value, components }
    }

    /// Hex fingerprint string
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Inputs that went into the fingerprint, in hashing order
    pub fn components(&self) -> &[(String, String)] {
        &self.components
    }
}

impl fmt::Display for BuildFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.depth() > 0 && entry.file_type().is_dir() {
        return SKIPPED_DIRS.contains(&name.as_ref());
    }
    Path::new(name.as_ref())
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SKIPPED_EXTENSIONS.contains(&ext))
}

/// Hash a source tree in sorted order
///
/// Each file contributes its relative path (with `/` separators) and the
/// digest of its contents. Symlinks contribute their target path.
pub fn hash_source_tree(root: &Path) -> WheelsmithResult<Digest> {
    if !root.is_dir() {
        return Err(WheelsmithError::SourceNotFound(root.to_path_buf()));
    }

    let mut hasher = Sha256::new();
    let mut files = 0usize;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let context = format!("walking source tree {}", root.display());
            WheelsmithError::io(context, e.into())
        })?;

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let file_type = entry.file_type();
        let content = if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path()).map_err(|e| {
                WheelsmithError::io(format!("reading link {}", entry.path().display()), e)
            })?;
            format!("link:{}", target.to_string_lossy())
        } else if file_type.is_file() {
            let digest = Digest::of_file(entry.path()).map_err(|e| {
                WheelsmithError::io(format!("hashing {}", entry.path().display()), e)
            })?;
            format!("file:{}", digest)
        } else {
            continue;
        };

        hasher.update(relative.as_bytes());
        hasher.update(b"\0");
        hasher.update(content.as_bytes());
        hasher.update(b"\n");
        files += 1;
    }

    debug!(root = %root.display(), files, "Hashed source tree");
    Digest::parse(&hex::encode(hasher.finalize()))
}
