//! On-disk layout of the cache root
//!
//! ```text
//! <root>/
//!   index.json          entry index, replaced atomically
//!   index.lock          lock file guarding index.json
//!   blobs/<aa>/<rest>   artifacts, sharded by the first digest byte
//!   tmp/                staging area for inserts and index writes
//! ```

use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BLOBS_DIR: &str = "blobs";
const TMP_DIR: &str = "tmp";
const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = "index.lock";

/// Paths inside a cache root
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Blob location relative to the root, as stored in the index
    pub fn blob_relative(&self, digest: &Digest) -> PathBuf {
        let (shard, rest) = digest.shard();
        Path::new(BLOBS_DIR).join(shard).join(rest)
    }

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(self.blob_relative(digest))
    }

    /// Create the root, blob and staging directories
    pub fn ensure(&self) -> WheelsmithResult<()> {
        for dir in [self.blobs_dir(), self.tmp_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                WheelsmithError::storage(format!("creating {}", dir.display()), e)
            })?;
        }
        Ok(())
    }

    /// Every file in the blob area whose path spells a digest.
    ///
    /// Files that do not fit the `<aa>/<rest>` shape are ignored.
    pub fn scan_blobs(&self) -> Vec<(Digest, PathBuf)> {
        WalkDir::new(self.blobs_dir())
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let digest = self.digest_for_blob(e.path())?;
                Some((digest, e.into_path()))
            })
            .collect()
    }

    fn digest_for_blob(&self, path: &Path) -> Option<Digest> {
        let rest = path.file_name()?.to_str()?;
        let shard = path.parent()?.file_name()?.to_str()?;
        if shard.len() != 2 {
            return None;
        }
        Digest::parse(&format!("{}{}", shard, rest))
            .ok()
            .filter(|d| d.shard() == (shard, rest))
    }
}
