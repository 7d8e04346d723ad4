// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Conversion ledger
//!
//! Records, per source path, which artifact(s) a conversion produced and
//! from which source fingerprint. The in-memory map is authoritative for
//! the process lifetime; `persist_all` writes it to `.conversions.json`
//! with write-temp-then-rename, so a crash leaves either the old ledger or
//! the new one. A ledger that lags behind only causes re-conversion.

use crate::fingerprint::FileFingerprint;
use crate::{Error, Result};
use backon::{BlockingRetryable, ExponentialBuilder};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Ledger file name, relative to the store directory
pub const LEDGER_FILE: &str = ".conversions.json";

/// Conversion parameters, e.g. `delimiter`, `engine`, `batch_size`
pub type ConverterParams = BTreeMap<String, String>;

/// Ledger contents: source path to its conversion record
pub type LedgerMap = BTreeMap<PathBuf, ConversionRecord>;

/// One converted table of a multi-table source
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub table_name: String,
    pub artifact_path: PathBuf,
    pub artifact_fingerprint: FileFingerprint,
}

/// What the ledger knows about one converted source file
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRecord {
    pub source_fingerprint: FileFingerprint,
    pub converter_id: String,
    pub table_name: String,
    pub artifact_path: PathBuf,
    pub artifact_fingerprint: FileFingerprint,
    pub converted_at_nanos: u64,
    #[serde(default)]
    pub converter_params: ConverterParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_artifacts: Vec<ArtifactRef>,
}

impl ConversionRecord {
    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_fingerprint.path
    }

    /// Every artifact of this record, primary first
    #[must_use]
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        let mut all = Vec::with_capacity(1 + self.additional_artifacts.len());
        all.push(ArtifactRef {
            table_name: self.table_name.clone(),
            artifact_path: self.artifact_path.clone(),
            artifact_fingerprint: self.artifact_fingerprint.clone(),
        });
        all.extend(self.additional_artifacts.iter().cloned());
        all
    }
}

/// Process-scoped ledger of completed conversions
#[derive(Debug)]
pub struct ConversionMetadataStore {
    dir: PathBuf,
    records: RwLock<Arc<LedgerMap>>,
    /// Bumped on every mutation
    generation: AtomicU64,
    /// Generation last written to (or read from) disk
    persisted: AtomicU64,
}

impl ConversionMetadataStore {
    /// A store whose ledger lives in `dir`. Nothing is read until `load_all`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            records: RwLock::new(Arc::new(LedgerMap::new())),
            generation: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    /// The record for `fingerprint.path`, only if it was made from exactly
    /// this source fingerprint.
    #[must_use]
    pub fn lookup(&self, fingerprint: &FileFingerprint) -> Option<ConversionRecord> {
        let records = self.snapshot();
        records
            .get(&fingerprint.path)
            .filter(|r| r.source_fingerprint == *fingerprint)
            .cloned()
    }

    /// The record for `path`, stale or not
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<ConversionRecord> {
        self.snapshot().get(path).cloned()
    }

    /// Insert or replace the record for its source path; returns the replaced one.
    pub fn record(&self, entry: ConversionRecord) -> Option<ConversionRecord> {
        let path = entry.source_path().to_path_buf();
        let previous = {
            let mut guard = self.records.write();
            Arc::make_mut(&mut guard).insert(path.clone(), entry)
        };
        _ = self.generation.fetch_add(1, Ordering::SeqCst);
        let path_str = path.display().to_string();
        diagnostics::debug!("Recorded conversion for {path}", path: path_str);
        previous
    }

    pub fn remove(&self, path: &Path) -> Option<ConversionRecord> {
        let removed = {
            let mut guard = self.records.write();
            if !guard.contains_key(path) {
                return None;
            }
            Arc::make_mut(&mut guard).remove(path)
        };
        _ = self.generation.fetch_add(1, Ordering::SeqCst);
        removed
    }

    /// Immutable view of the whole ledger
    #[must_use]
    pub fn snapshot(&self) -> Arc<LedgerMap> {
        self.records.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Whether the in-memory ledger has changes not yet persisted
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.persisted.load(Ordering::SeqCst)
    }

    /// Read the ledger file and install it as the in-memory state.
    ///
    /// A missing file is an empty ledger.
    pub fn load_all(&self) -> Result<LedgerMap> {
        let path = self.ledger_path();
        let loaded: LedgerMap = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::LedgerCorrupt {
                path: path.clone(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerMap::new(),
            Err(e) => return Err(e.into()),
        };

        let count = loaded.len();
        let path_str = path.display().to_string();
        diagnostics::info!("Loaded {count} conversion records from {path}", count: count, path: path_str);

        *self.records.write() = Arc::new(loaded.clone());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.persisted.store(generation, Ordering::SeqCst);
        Ok(loaded)
    }

    /// Write the in-memory state to the ledger file atomically.
    ///
    /// Transient write failures are retried a few times before surfacing
    /// `LedgerPersistFailure`; the in-memory state is unaffected either way.
    pub fn persist_all(&self) -> Result<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let records = self.snapshot();
        let path = self.ledger_path();

        let write = || write_ledger(&self.dir, &path, &records);
        write
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(10))
                    .with_max_times(3),
            )
            .sleep(std::thread::sleep)
            .when(|e: &std::io::Error| e.kind() != std::io::ErrorKind::PermissionDenied)
            .notify(|e: &std::io::Error, after: Duration| {
                let after_ms = after.as_millis() as u64;
                let err = e.to_string();
                diagnostics::warn!("Retrying ledger write after {after_ms}ms: {error}", after_ms: after_ms, error: err);
            })
            .call()
            .map_err(|source| Error::LedgerPersistFailure {
                path: path.clone(),
                source,
            })?;

        self.persisted.store(generation, Ordering::SeqCst);
        let count = records.len();
        let path_str = path.display().to_string();
        diagnostics::info!("Persisted {count} conversion records to {path}", count: count, path: path_str);
        Ok(())
    }

    /// Drop records rejected by `retain`, deleting their artifacts when
    /// they live under `artifact_dir`. Returns the removed records.
    pub fn prune<F>(&self, artifact_dir: &Path, mut retain: F) -> Vec<ConversionRecord>
    where
        F: FnMut(&ConversionRecord) -> bool,
    {
        let doomed: Vec<PathBuf> = self
            .snapshot()
            .values()
            .filter(|r| !retain(r))
            .map(|r| r.source_path().to_path_buf())
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for path in doomed {
            let Some(record) = self.remove(&path) else {
                continue;
            };
            for artifact in record.artifacts() {
                if artifact.artifact_path.starts_with(artifact_dir) {
                    if let Err(e) = std::fs::remove_file(&artifact.artifact_path) {
                        let path_str = artifact.artifact_path.display().to_string();
                        let err = e.to_string();
                        diagnostics::debug!("Could not remove artifact {path}: {error}", path: path_str, error: err);
                    }
                }
            }
            removed.push(record);
        }
        removed
    }

    /// Drop records whose source file no longer exists.
    pub fn prune_missing(&self, artifact_dir: &Path) -> Vec<ConversionRecord> {
        self.prune(artifact_dir, |r| r.source_path().exists())
    }
}

fn write_ledger(dir: &Path, path: &Path, records: &LedgerMap) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, records).map_err(std::io::Error::other)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    _ = tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fingerprint(path: &str, size: u64) -> FileFingerprint {
        FileFingerprint {
            path: PathBuf::from(path),
            size_bytes: size,
            modified_at_nanos: 1_700_000_000_000_000_000,
            content_hash: None,
        }
    }

    fn record(path: &str, size: u64) -> ConversionRecord {
        ConversionRecord {
            source_fingerprint: fingerprint(path, size),
            converter_id: "delimited".to_string(),
            table_name: "sales".to_string(),
            artifact_path: PathBuf::from(format!("{path}.parquet")),
            artifact_fingerprint: fingerprint(&format!("{path}.parquet"), size * 2),
            converted_at_nanos: 42,
            converter_params: ConverterParams::from([("delimiter".to_string(), ",".to_string())]),
            additional_artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_lookup_requires_matching_fingerprint() {
        let store = ConversionMetadataStore::open("/unused");
        assert!(store.record(record("/data/sales.csv", 10)).is_none());

        assert!(store.lookup(&fingerprint("/data/sales.csv", 10)).is_some());
        assert!(store.lookup(&fingerprint("/data/sales.csv", 11)).is_none());
        assert!(store.get(Path::new("/data/sales.csv")).is_some());
    }

    #[test]
    fn test_record_overwrites_same_path() {
        let store = ConversionMetadataStore::open("/unused");
        _ = store.record(record("/data/sales.csv", 10));
        let replaced = store.record(record("/data/sales.csv", 20));
        assert_eq!(replaced.map(|r| r.source_fingerprint.size_bytes), Some(10));
        assert_eq!(store.len(), 1);
        let current = store.get(Path::new("/data/sales.csv")).expect("record");
        assert_eq!(current.source_fingerprint.size_bytes, 20);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let store = ConversionMetadataStore::open("/unused");
        _ = store.record(record("/data/a.csv", 1));
        let before = store.snapshot();
        _ = store.record(record("/data/b.csv", 2));
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn test_persist_then_load_round_trip() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = ConversionMetadataStore::open(dir.path());
        _ = store.record(record("/data/a.csv", 1));
        _ = store.record(record("/data/b.csv", 2));
        assert!(store.is_dirty());
        store.persist_all()?;
        assert!(!store.is_dirty());

        let reopened = ConversionMetadataStore::open(dir.path());
        let loaded = reopened.load_all()?;
        assert_eq!(loaded, *store.snapshot());
        assert!(!reopened.is_dirty());

        // Only the ledger itself remains, no temp files
        let names: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![LEDGER_FILE.to_string()]);
        Ok(())
    }

    #[test]
    fn test_ledger_uses_camel_case_fields() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = ConversionMetadataStore::open(dir.path());
        _ = store.record(record("/data/a.csv", 1));
        store.persist_all()?;
        let text = std::fs::read_to_string(store.ledger_path())?;
        for field in [
            "sourceFingerprint",
            "converterId",
            "artifactPath",
            "artifactFingerprint",
            "convertedAtNanos",
            "converterParams",
        ] {
            assert!(text.contains(field), "missing {field}");
        }
        Ok(())
    }

    #[test]
    fn test_missing_ledger_is_empty_and_corrupt_is_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = ConversionMetadataStore::open(dir.path());
        assert!(store.load_all()?.is_empty());

        std::fs::write(store.ledger_path(), "{ not json")?;
        let err = store.load_all().expect_err("corrupt ledger");
        assert!(matches!(err, Error::LedgerCorrupt { .. }));
        Ok(())
    }

    #[test]
    fn test_persist_failure_keeps_memory_state() -> anyhow::Result<()> {
        let dir = tempdir()?;
        // A regular file where the ledger directory should be
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x")?;
        let store = ConversionMetadataStore::open(&blocker);
        _ = store.record(record("/data/a.csv", 1));

        let err = store.persist_all().expect_err("persist must fail");
        assert!(matches!(err, Error::LedgerPersistFailure { .. }));
        assert!(store.is_dirty());
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn test_prune_removes_artifacts_in_managed_dir() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts)?;
        let artifact = artifacts.join("a.parquet");
        std::fs::write(&artifact, "PAR1")?;

        let store = ConversionMetadataStore::open(dir.path());
        let mut gone = record("/data/gone.csv", 1);
        gone.artifact_path = artifact.clone();
        _ = store.record(gone);
        _ = store.record(record("/data/kept.csv", 1));

        let removed = store.prune(&artifacts, |r| r.source_path() == Path::new("/data/kept.csv"));
        assert_eq!(removed.len(), 1);
        assert!(!artifact.exists());
        assert_eq!(store.len(), 1);
        Ok(())
    }
}
