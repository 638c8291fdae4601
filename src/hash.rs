//! Content digests for artifacts
//!
//! Every artifact is identified by the SHA-256 of its bytes, rendered as
//! 64 lowercase hex characters. The same digest is the cache key, the
//! storage path, and the tamper-evidence check on read.

use crate::error::{WheelsmithError, WheelsmithResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Name of the digest algorithm, used as an identifier prefix
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Length of a digest in hex characters
pub const DIGEST_HEX_LEN: usize = 64;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 content digest of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Digest a byte slice
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Digest everything a reader yields, without buffering it all in memory
    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Digest a file on disk
    pub fn of_file(path: &Path) -> io::Result<Self> {
        Self::of_reader(File::open(path)?)
    }

    /// Parse a hex digest, accepting an optional `sha256:` prefix
    pub fn parse(s: &str) -> WheelsmithResult<Self> {
        let trimmed = s.trim();
        let hex_part = trimmed
            .strip_prefix(DIGEST_ALGORITHM)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(trimmed);

        if hex_part.len() != DIGEST_HEX_LEN || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(WheelsmithError::InvalidDigest(s.to_string()));
        }

        Ok(Self(hex_part.to_ascii_lowercase()))
    }

    /// The full hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    /// Split into the two-character shard prefix and the remainder
    pub fn shard(&self) -> (&str, &str) {
        self.0.split_at(2)
    }

    /// Prefixed form used on the wire, e.g. `sha256:ab12...`
    pub fn prefixed(&self) -> String {
        format!("{}:{}", DIGEST_ALGORITHM, self.0)
    }
}

/// Digest a byte slice
pub fn digest(bytes: &[u8]) -> Digest {
    Digest::of_bytes(bytes)
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = WheelsmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = WheelsmithError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}
