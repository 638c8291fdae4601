//! Advisory file locks shared between cache processes
//!
//! | Lock | File | Held by |
//! |------|------|---------|
//! | index, exclusive | `index.lock` | a process rewriting `index.json` |
//! | index, shared | `index.lock` | a process re-reading `index.json` |
//! | blob, shared | the blob itself | every outstanding lease |
//! | blob, exclusive | the blob itself | eviction or purge, only while unlinking |
//! | staging | `<dir>/.lock` | the owner of a staging directory |
//!
//! Locks are `flock`-style: they belong to an open file handle and are
//! released when the handle closes, including on crash.

use crate::error::{WheelsmithError, WheelsmithResult};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;

/// Marker file that keeps a staging directory alive
const STAGING_LOCK_FILE: &str = ".lock";

/// Whether a failed `try_lock_*` means another handle holds the lock
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Lock on the cache index, released on drop
#[derive(Debug)]
pub struct IndexLock {
    file: File,
}

impl IndexLock {
    fn open(path: &Path) -> WheelsmithResult<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| WheelsmithError::storage(format!("opening {}", path.display()), e))
    }

    /// Block until no other handle holds the index lock
    pub fn exclusive(path: &Path) -> WheelsmithResult<Self> {
        let file = Self::open(path)?;
        fs2::FileExt::lock_exclusive(&file)
            .map_err(|e| WheelsmithError::storage("locking cache index", e))?;
        Ok(Self { file })
    }

    /// Block until no writer holds the index lock
    pub fn shared(path: &Path) -> WheelsmithResult<Self> {
        let file = Self::open(path)?;
        fs2::FileExt::lock_shared(&file)
            .map_err(|e| WheelsmithError::storage("locking cache index", e))?;
        Ok(Self { file })
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Shared lock on a blob; while any exists the blob is not removed
#[derive(Debug)]
pub struct BlobLease {
    _file: File,
}

/// Take a shared lock on the blob at `path`.
///
/// `Ok(None)` when the blob is gone, including when it was unlinked while
/// this call waited for a remover to finish.
pub fn lease_blob(path: &Path) -> io::Result<Option<BlobLease>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    fs2::FileExt::lock_shared(&file)?;
    if !still_linked(&file, path)? {
        return Ok(None);
    }
    Ok(Some(BlobLease { _file: file }))
}

/// Whether `path` still names the file behind `file`
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.is_file())
}

/// Outcome of trying to remove a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobRemoval {
    /// Removed, or already absent
    Removed,
    /// A lease holds the blob; nothing was touched
    InUse,
}

/// Remove a blob unless some process holds a lease on it
pub fn remove_unleased_blob(path: &Path) -> io::Result<BlobRemoval> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BlobRemoval::Removed),
        Err(e) => return Err(e),
    };
    match fs2::FileExt::try_lock_exclusive(&file) {
        Ok(()) => {}
        Err(e) if is_contended(&e) => return Ok(BlobRemoval::InUse),
        Err(e) => return Err(e),
    }
    remove_blob_file(path)?;
    Ok(BlobRemoval::Removed)
}

/// Whether another handle holds any lock on the file at `path`
fn locked_elsewhere(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match fs2::FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = fs2::FileExt::unlock(&file);
            false
        }
        Err(e) => is_contended(&e),
    }
}

/// Remove a blob file, then its shard directory if that left it empty
pub fn remove_blob_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(shard) = path.parent() {
        // Fails when other blobs share the shard
        let _ = std::fs::remove_dir(shard);
    }
    Ok(())
}

/// Scratch directory under the cache staging area.
///
/// Holds an exclusive lock on `<dir>/.lock` for its whole life, so a stale
/// staging sweep in another process leaves it alone. Removed on drop.
#[derive(Debug)]
pub struct StagingDir {
    // Released before the directory is removed
    lock: File,
    dir: TempDir,
}

impl StagingDir {
    pub fn new_in(staging_root: &Path, prefix: &str) -> WheelsmithResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(staging_root)
            .map_err(|e| WheelsmithError::storage("creating staging directory", e))?;
        let lock_path = dir.path().join(STAGING_LOCK_FILE);
        let lock = File::create(&lock_path)
            .map_err(|e| WheelsmithError::storage(format!("creating {}", lock_path.display()), e))?;
        fs2::FileExt::try_lock_exclusive(&lock)
            .map_err(|e| WheelsmithError::storage("locking staging directory", e))?;
        debug!(path = %dir.path().display(), "Created staging directory");
        Ok(Self { lock, dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock);
    }
}

/// Whether a lease currently holds the blob at `path`
pub fn blob_in_use(path: &Path) -> bool {
    locked_elsewhere(path)
}

/// Whether a live process owns the staging directory at `dir`
pub fn staging_dir_in_use(dir: &Path) -> bool {
    locked_elsewhere(&dir.join(STAGING_LOCK_FILE))
}
