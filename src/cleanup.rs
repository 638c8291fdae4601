//! Guard for recursive directory deletion
//!
//! Output directories and the cache blob area are removed recursively.
//! Before that happens the target is resolved to its absolute,
//! symlink-free form and compared against a set of protected locations.
//! The resolved path is what gets deleted, so a symlink swapped in after
//! the check cannot redirect the delete.

use crate::error::{WheelsmithError, WheelsmithResult};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Paths with fewer normal segments than this are never deleted
pub const MIN_PATH_SEGMENTS: usize = 3;

#[cfg(unix)]
const SYSTEM_DIRS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/opt", "/proc", "/root", "/sbin", "/srv",
    "/sys", "/tmp", "/usr", "/var",
];

#[cfg(target_os = "macos")]
const MACOS_DIRS: &[&str] = &["/System", "/Library", "/Applications", "/Users", "/private"];

/// Locations that must never be deleted, nor any of their ancestors
pub fn protected_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(unix)]
    {
        paths.push(PathBuf::from("/"));
        paths.extend(SYSTEM_DIRS.iter().map(PathBuf::from));
    }

    #[cfg(target_os = "macos")]
    paths.extend(MACOS_DIRS.iter().map(PathBuf::from));

    #[cfg(windows)]
    {
        for var in ["SystemDrive", "SystemRoot", "ProgramFiles", "ProgramFiles(x86)"] {
            if let Some(value) = std::env::var_os(var) {
                let mut p = PathBuf::from(value);
                if var == "SystemDrive" {
                    p.push("\\");
                }
                paths.push(p);
            }
        }
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home);
    }

    paths
}

/// Resolve a path to absolute, symlink-free form.
///
/// Paths that do not exist yet are resolved by canonicalizing the deepest
/// existing ancestor and appending the lexically normalized remainder.
pub fn resolve_cleanup_target(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    if let Ok(resolved) = absolute.canonicalize() {
        return Ok(resolved);
    }

    let normalized = normalize_lexically(&absolute);
    let mut existing = normalized.as_path();
    let mut tail = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(base) => {
                let mut resolved = base;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(_) => {
                let name = existing.file_name().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no existing ancestor")
                })?;
                tail.push(name.to_os_string());
                existing = existing.parent().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no existing ancestor")
                })?;
            }
        }
    }
}

/// Drop `.` and fold `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn normal_segment_count(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

/// Check a resolved path against the segment minimum and protected set
fn resolved_is_dangerous(resolved: &Path) -> bool {
    if normal_segment_count(resolved) < MIN_PATH_SEGMENTS {
        return true;
    }

    protected_paths().iter().any(|protected| {
        let canonical = protected.canonicalize().ok();
        protected.starts_with(resolved)
            || canonical
                .as_deref()
                .is_some_and(|c| c.starts_with(resolved))
    })
}

/// Whether deleting `path` recursively could destroy something important.
///
/// Fails closed: a path that cannot be resolved is dangerous.
pub fn is_dangerous_cleanup_path(path: &Path) -> bool {
    match resolve_cleanup_target(path) {
        Ok(resolved) => resolved_is_dangerous(&resolved),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot resolve cleanup target");
            true
        }
    }
}

/// Recursively delete a directory after the guard approves it.
///
/// Missing targets are a no-op. Symlinked targets are refused.
pub fn remove_dir_guarded(path: &Path) -> WheelsmithResult<()> {
    let refused = || WheelsmithError::DangerousCleanupRefused {
        path: path.to_path_buf(),
    };

    let resolved = resolve_cleanup_target(path).map_err(|_| refused())?;
    if resolved_is_dangerous(&resolved) {
        warn!(path = %path.display(), resolved = %resolved.display(), "Refusing dangerous cleanup");
        return Err(refused());
    }

    if std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) {
        warn!(path = %path.display(), "Refusing to delete through a symlink");
        return Err(refused());
    }

    debug!(path = %resolved.display(), "Removing directory");
    match std::fs::remove_dir_all(&resolved) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WheelsmithError::io(
            format!("Failed to remove {}", resolved.display()),
            e,
        )),
    }
}
