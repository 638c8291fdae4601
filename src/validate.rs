//! Archive validation for untrusted wheels
//!
//! Wheels come from build backends and from the registry, neither of which
//! is trusted. Before an archive is admitted to the cache its entry names
//! are checked for traversal and its `.dist-info` manifest is checked for
//! presence. Nothing is extracted.

use crate::error::ValidationError;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Upper bound on manifest file size read during validation
const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

const METADATA_FILE: &str = "METADATA";
const WHEEL_FILE: &str = "WHEEL";
const DIST_INFO_SUFFIX: &str = ".dist-info";

/// What a valid archive told us about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelInfo {
    pub name: String,
    pub version: String,
    /// Name of the `.dist-info` directory, e.g. `demo-1.0.dist-info`
    pub dist_info: String,
    pub entry_count: usize,
}

/// Checks archive entry names and required manifests
#[derive(Debug, Clone, Default)]
pub struct ArchiveValidator;

impl ArchiveValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate an archive on disk
    pub fn validate_path(&self, path: &Path) -> Result<WheelInfo, ValidationError> {
        let file = File::open(path).map_err(|e| ValidationError::Unreadable {
            reason: format!("{}: {}", path.display(), e),
        })?;
        self.validate_reader(file)
    }

    /// Validate an archive held in memory
    pub fn validate_bytes(&self, bytes: &[u8]) -> Result<WheelInfo, ValidationError> {
        self.validate_reader(Cursor::new(bytes))
    }

    fn validate_reader<R: Read + Seek>(&self, reader: R) -> Result<WheelInfo, ValidationError> {
        let mut archive = ZipArchive::new(reader).map_err(|e| ValidationError::Unreadable {
            reason: e.to_string(),
        })?;

        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        for name in &names {
            check_entry_path(name)?;
        }

        let dist_info = find_dist_info(&names).ok_or(ValidationError::MissingMetadata)?;

        let wheel_path = format!("{}/{}", dist_info, WHEEL_FILE);
        if !names.iter().any(|n| *n == wheel_path) {
            return Err(ValidationError::MissingFormatMarker);
        }
        let wheel = read_manifest(&mut archive, &wheel_path)?;
        if header_value(&wheel, "Wheel-Version").is_none() {
            return Err(ValidationError::MissingFormatMarker);
        }

        let metadata_path = format!("{}/{}", dist_info, METADATA_FILE);
        let metadata = read_manifest(&mut archive, &metadata_path)?;
        let name = header_value(&metadata, "Name").ok_or_else(|| ValidationError::InvalidMetadata {
            reason: "missing Name header".to_string(),
        })?;
        let version =
            header_value(&metadata, "Version").ok_or_else(|| ValidationError::InvalidMetadata {
                reason: "missing Version header".to_string(),
            })?;

        debug!(name = %name, version = %version, entries = names.len(), "Archive validated");

        Ok(WheelInfo {
            name,
            version,
            dist_info,
            entry_count: names.len(),
        })
    }
}

/// Reject entry names that could land outside the extraction root.
///
/// Backslashes count as separators, `.` is dropped, and `..` pops one
/// segment; popping past the root is unsafe. `a/../b` normalizes inside the
/// root and is accepted.
pub fn check_entry_path(entry: &str) -> Result<(), ValidationError> {
    let unsafe_path = || ValidationError::UnsafeArchivePath {
        entry: entry.to_string(),
    };

    if entry.is_empty() || entry.contains('\0') {
        return Err(unsafe_path());
    }
    if entry.starts_with('/') || entry.starts_with('\\') {
        return Err(unsafe_path());
    }
    let bytes = entry.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(unsafe_path());
    }

    let mut depth: usize = 0;
    for segment in entry.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                depth = depth.checked_sub(1).ok_or_else(unsafe_path)?;
            }
            _ => depth += 1,
        }
    }

    Ok(())
}

/// A bare file name safe to join onto an output directory.
///
/// Names from the registry are untrusted; anything with a separator, a
/// NUL byte, or that is `.`/`..` is refused.
pub fn safe_file_name(name: &str) -> Option<&str> {
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    if name.contains(['/', '\\', '\0']) {
        return None;
    }
    Some(name)
}

/// Find the top-level `*.dist-info` directory that holds METADATA
fn find_dist_info(names: &[String]) -> Option<String> {
    names.iter().find_map(|name| {
        let (dir, file) = name.split_once('/')?;
        (dir.ends_with(DIST_INFO_SUFFIX) && dir.len() > DIST_INFO_SUFFIX.len() && file == METADATA_FILE)
            .then(|| dir.to_string())
    })
}

fn read_manifest<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, ValidationError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ValidationError::Unreadable {
            reason: format!("{}: {}", name, e),
        })?;

    let mut contents = String::new();
    entry
        .take(MAX_MANIFEST_BYTES)
        .read_to_string(&mut contents)
        .map_err(|e| ValidationError::Unreadable {
            reason: format!("{}: {}", name, e),
        })?;
    Ok(contents)
}

/// Value of an RFC 822 style header in a manifest, stopping at the body
fn header_value(text: &str, key: &str) -> Option<String> {
    for line in text.lines() {
        if line.trim().is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            if k.trim().eq_ignore_ascii_case(key) {
                let value = v.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
