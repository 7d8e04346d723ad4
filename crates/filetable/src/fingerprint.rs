// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! File fingerprints: the staleness key for conversions and cache entries.

use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of a file at one point in time.
///
/// Two fingerprints are equal iff every field matches. Fingerprints are
/// recomputed for every staleness check and never cached.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct FileFingerprint {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at_nanos: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl FileFingerprint {
    /// Stat `path` (and hash its content when `hash_contents` is set).
    pub fn compute<P: AsRef<Path>>(path: P, hash_contents: bool) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;
        let modified_at_nanos = meta.modified().map(system_time_nanos).unwrap_or(0);
        let content_hash = if hash_contents {
            Some(sha256_file(path)?)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            size_bytes: meta.len(),
            modified_at_nanos,
            content_hash,
        })
    }

    /// Like [`FileFingerprint::compute`], but a missing file yields `None`.
    pub fn probe<P: AsRef<Path>>(path: P, hash_contents: bool) -> Result<Option<Self>> {
        match Self::compute(path, hash_contents) {
            Ok(fp) => Ok(Some(fp)),
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Short hex digest of the whole fingerprint, stable across runs.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.update(self.size_bytes.to_le_bytes());
        hasher.update(self.modified_at_nanos.to_le_bytes());
        if let Some(hash) = &self.content_hash {
            hasher.update(hash.as_bytes());
        }
        let full = hex::encode(hasher.finalize());
        full[..16].to_string()
    }
}

impl std::fmt::Display for FileFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} bytes, mtime {})",
            self.path.display(),
            self.size_bytes,
            self.modified_at_nanos
        )
    }
}

fn system_time_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Nanoseconds since the Unix epoch, now.
#[must_use]
pub fn now_nanos() -> u64 {
    system_time_nanos(SystemTime::now())
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
