// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Conversion manager
//!
//! `ensure_converted` is the only way artifacts come into existence. A
//! source is converted when the ledger has no record for its current
//! fingerprint, when the conversion parameters changed, or when a recorded
//! artifact no longer matches its recorded fingerprint. Otherwise the
//! existing record is returned and no converter runs.

use crate::cache::StorageCacheManager;
use crate::config::EngineConfig;
use crate::convert::{ArtifactDestination, ConvertOptions, ConverterRegistry};
use crate::fingerprint::{FileFingerprint, now_nanos};
use crate::flight::SingleFlight;
use crate::metadata::{ArtifactRef, ConversionMetadataStore, ConversionRecord};
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Everything one conversion needs, owned so it can move to a blocking worker
#[derive(Clone)]
struct ConversionJob {
    store: Arc<ConversionMetadataStore>,
    registry: Arc<ConverterRegistry>,
    cache: Arc<StorageCacheManager>,
    options: ConvertOptions,
    hash_contents: bool,
    artifact_dir: PathBuf,
    performed: Arc<AtomicUsize>,
}

pub struct ConversionManager {
    job: ConversionJob,
    parallelism: usize,
    flight: SingleFlight<PathBuf, ConversionRecord>,
}

impl std::fmt::Debug for ConversionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionManager")
            .field("artifact_dir", &self.job.artifact_dir)
            .field("converters", &self.job.registry.ids())
            .field("performed", &self.conversions_performed())
            .finish()
    }
}

impl ConversionManager {
    #[must_use]
    pub fn new(
        store: Arc<ConversionMetadataStore>,
        registry: Arc<ConverterRegistry>,
        cache: Arc<StorageCacheManager>,
        config: &EngineConfig,
    ) -> Self {
        let artifact_dir = config.artifact_dir_for(store.dir());
        Self {
            job: ConversionJob {
                store,
                registry,
                cache,
                options: ConvertOptions::from(config),
                hash_contents: config.hash_contents,
                artifact_dir,
                performed: Arc::new(AtomicUsize::new(0)),
            },
            parallelism: config.conversion_parallelism.max(1),
            flight: SingleFlight::new(),
        }
    }

    /// A manager whose ledger lives in `ledger_dir`, loading any persisted
    /// records. An unreadable ledger is logged and treated as empty.
    pub fn open<P: AsRef<Path>>(ledger_dir: P, config: &EngineConfig) -> Result<Self> {
        let store = Arc::new(ConversionMetadataStore::open(ledger_dir));
        if let Err(e) = store.load_all() {
            let err = e.to_string();
            diagnostics::warn!("Starting with an empty conversion ledger: {error}", error: &err);
        }
        Ok(Self::new(
            store,
            Arc::new(ConverterRegistry::from_config(config)?),
            Arc::new(StorageCacheManager::new(config.cache_max_bytes)),
            config,
        ))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ConversionMetadataStore> {
        &self.job.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        &self.job.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<StorageCacheManager> {
        &self.job.cache
    }

    #[must_use]
    pub fn artifact_dir(&self) -> &Path {
        &self.job.artifact_dir
    }

    #[must_use]
    pub fn options(&self) -> &ConvertOptions {
        &self.job.options
    }

    #[must_use]
    pub fn supports(&self, path: &Path) -> bool {
        self.job.registry.supports(path)
    }

    /// Number of converter invocations so far
    #[must_use]
    pub fn conversions_performed(&self) -> usize {
        self.job.performed.load(Ordering::SeqCst)
    }

    /// The up-to-date conversion record for `source`, converting if needed.
    ///
    /// Concurrent calls for the same path share one conversion.
    pub async fn ensure_converted(&self, source: &Path) -> Result<ConversionRecord> {
        let source = source.to_path_buf();
        let job = self.job.clone();
        self.flight
            .run(source.clone(), move || async move {
                tokio::task::spawn_blocking(move || job.run(&source))
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(format!("conversion task failed: {e}"))))?
            })
            .await
    }

    /// Write the ledger if it has unpersisted changes.
    pub async fn persist_ledger(&self) -> Result<()> {
        if !self.job.store.is_dirty() {
            return Ok(());
        }
        let store = self.job.store.clone();
        tokio::task::spawn_blocking(move || store.persist_all())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("ledger task failed: {e}"))))?
    }

    /// Forget sources that no longer exist and delete their artifacts,
    /// then persist the ledger. Returns the dropped records.
    pub async fn prune_missing(&self) -> Result<Vec<ConversionRecord>> {
        let store = self.job.store.clone();
        let artifact_dir = self.job.artifact_dir.clone();
        let removed = tokio::task::spawn_blocking(move || store.prune_missing(&artifact_dir))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("prune task failed: {e}"))))?;
        for record in &removed {
            for artifact in record.artifacts() {
                _ = self.job.cache.invalidate(&artifact.artifact_fingerprint);
            }
        }
        let count = removed.len();
        diagnostics::info!("Pruned {count} conversion records", count: count);
        self.persist_ledger().await?;
        Ok(removed)
    }

    /// Convert `paths` concurrently; one failure does not affect the others.
    /// Results are in input order.
    pub async fn ensure_all(&self, paths: Vec<PathBuf>) -> Vec<(PathBuf, Result<ConversionRecord>)> {
        stream::iter(paths)
            .map(|path| async move {
                let result = self.ensure_converted(&path).await;
                (path, result)
            })
            .buffered(self.parallelism)
            .collect()
            .await
    }
}

impl ConversionJob {
    fn run(&self, source: &Path) -> Result<ConversionRecord> {
        let fingerprint = FileFingerprint::compute(source, self.hash_contents)?;
        let converter = self
            .registry
            .find(source)
            .ok_or_else(|| Error::unsupported_format(source))?;
        let params = converter.params(source, &self.options);
        let path_str = source.display().to_string();

        if let Some(existing) = self.store.lookup(&fingerprint)
            && existing.converter_id == converter.id()
            && existing.converter_params == params
            && artifacts_intact(&existing)
        {
            diagnostics::debug!("Conversion of {path} is current", path: &path_str);
            return Ok(existing);
        }

        let converter_id = converter.id();
        diagnostics::debug!("Converting {path} with {converter_id}", path: &path_str, converter_id: converter_id);

        let destination =
            ArtifactDestination::new(&self.artifact_dir, &fingerprint, &params, self.options.engine);
        _ = self.performed.fetch_add(1, Ordering::SeqCst);
        let descriptor = converter.convert(source, &destination, &self.options)?;

        let mut artifacts = Vec::with_capacity(descriptor.tables.len());
        for table in descriptor.tables {
            let artifact_fingerprint = FileFingerprint::compute(&table.artifact_path, false)?;
            artifacts.push(ArtifactRef {
                table_name: table.table_name,
                artifact_path: table.artifact_path,
                artifact_fingerprint,
            });
        }
        let mut artifacts = artifacts.into_iter();
        let primary = artifacts
            .next()
            .ok_or_else(|| Error::conversion(source, converter_id, "no tables produced"))?;

        let record = ConversionRecord {
            source_fingerprint: fingerprint,
            converter_id: converter_id.to_string(),
            table_name: primary.table_name,
            artifact_path: primary.artifact_path,
            artifact_fingerprint: primary.artifact_fingerprint,
            converted_at_nanos: now_nanos(),
            converter_params: params,
            additional_artifacts: artifacts.collect(),
        };

        if let Some(previous) = self.store.record(record.clone()) {
            for artifact in previous.artifacts() {
                _ = self.cache.invalidate(&artifact.artifact_fingerprint);
            }
        }

        let tables = 1 + record.additional_artifacts.len();
        diagnostics::info!("Converted {path} with {converter_id} into {tables} table(s)", path: &path_str, converter_id: converter_id, tables: tables);
        Ok(record)
    }
}

/// Whether every artifact of `record` still matches its recorded fingerprint
fn artifacts_intact(record: &ConversionRecord) -> bool {
    record.artifacts().iter().all(|artifact| {
        matches!(
            FileFingerprint::probe(&artifact.artifact_path, false),
            Ok(Some(current)) if current == artifact.artifact_fingerprint
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn manager(dir: &Path) -> ConversionManager {
        ConversionManager::new(
            Arc::new(ConversionMetadataStore::open(dir)),
            Arc::new(ConverterRegistry::with_defaults()),
            Arc::new(StorageCacheManager::new(1 << 20)),
            &EngineConfig::default(),
        )
    }

    /// Rewrite a file so its fingerprint surely changes
    fn rewrite(path: &Path, content: &str) -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(path, content)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_source_is_not_reconverted() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("sales.csv");
        std::fs::write(&source, "a,b\n1,2\n")?;
        let manager = manager(dir.path());

        let first = manager.ensure_converted(&source).await?;
        let second = manager.ensure_converted(&source).await?;
        assert_eq!(first, second);
        assert_eq!(manager.conversions_performed(), 1);
        assert!(first.artifact_path.starts_with(manager.artifact_dir()));
        assert_eq!(first.table_name, "sales");
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_source_is_reconverted() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("sales.csv");
        std::fs::write(&source, "a,b\n1,2\n")?;
        let manager = manager(dir.path());

        let first = manager.ensure_converted(&source).await?;
        rewrite(&source, "a,b\n1,2\n3,4\n")?;
        let second = manager.ensure_converted(&source).await?;

        assert_eq!(manager.conversions_performed(), 2);
        assert_ne!(first.source_fingerprint, second.source_fingerprint);
        assert_ne!(first.artifact_path, second.artifact_path);
        // The old artifact stays readable for snapshots that still use it
        assert!(first.artifact_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_deleted_artifact_is_rebuilt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("sales.csv");
        std::fs::write(&source, "a\n1\n")?;
        let manager = manager(dir.path());

        let first = manager.ensure_converted(&source).await?;
        std::fs::remove_file(&first.artifact_path)?;
        let second = manager.ensure_converted(&source).await?;
        assert_eq!(manager.conversions_performed(), 2);
        assert!(second.artifact_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_param_change_triggers_reconversion() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("sales.csv");
        std::fs::write(&source, "a\n1\n")?;
        let store = Arc::new(ConversionMetadataStore::open(dir.path()));
        let registry = Arc::new(ConverterRegistry::with_defaults());
        let cache = Arc::new(StorageCacheManager::new(0));

        let parquet = ConversionManager::new(store.clone(), registry.clone(), cache.clone(), &EngineConfig::default());
        let first = parquet.ensure_converted(&source).await?;

        let config = EngineConfig {
            engine: crate::ExecutionEngine::Arrow,
            ..EngineConfig::default()
        };
        let arrow = ConversionManager::new(store, registry, cache, &config);
        let second = arrow.ensure_converted(&source).await?;

        assert_eq!(arrow.conversions_performed(), 1);
        assert_eq!(first.source_fingerprint, second.source_fingerprint);
        assert_eq!(
            second.artifact_path.extension().and_then(|e| e.to_str()),
            Some("arrow")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_leave_no_record() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ nope")?;
        let unknown = dir.path().join("notes.txt");
        std::fs::write(&unknown, "hello")?;
        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"[{"a": 1}]"#)?;
        let manager = manager(dir.path());

        let results = manager
            .ensure_all(vec![bad.clone(), unknown.clone(), good.clone()])
            .await;
        assert!(matches!(results[0].1, Err(Error::ConversionFailure { .. })));
        assert!(matches!(results[1].1, Err(Error::UnsupportedFormat { .. })));
        assert!(results[2].1.is_ok());

        assert!(manager.store().get(&bad).is_none());
        assert!(manager.store().get(&good).is_some());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_conversion() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("big.csv");
        let mut body = String::from("id,name\n");
        for i in 0..20_000 {
            body.push_str(&format!("{i},name{i}\n"));
        }
        std::fs::write(&source, body)?;
        let manager = Arc::new(manager(dir.path()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let source = source.clone();
            handles.push(tokio::spawn(async move { manager.ensure_converted(&source).await }));
        }
        let mut records = Vec::new();
        for handle in handles {
            records.push(handle.await??);
        }

        assert_eq!(manager.conversions_performed(), 1);
        assert!(records.windows(2).all(|w| w[0] == w[1]));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_failures_keep_their_kind() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ nope")?;
        let manager = manager(dir.path());

        let (a, b) = tokio::join!(manager.ensure_converted(&bad), manager.ensure_converted(&bad));
        assert!(matches!(a, Err(Error::ConversionFailure { .. })), "{a:?}");
        assert!(matches!(b, Err(Error::ConversionFailure { .. })), "{b:?}");
        assert!(manager.store().get(&bad).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_reconversion_invalidates_cached_batches() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("t.csv");
        std::fs::write(&source, "a\n1\n")?;
        let manager = manager(dir.path());

        let first = manager.ensure_converted(&source).await?;
        manager
            .cache()
            .put(first.artifact_fingerprint.clone(), Arc::from(Vec::new()));
        assert_eq!(manager.cache().stats().entries, 1);

        rewrite(&source, "a\n1\n2\n")?;
        _ = manager.ensure_converted(&source).await?;
        assert_eq!(manager.cache().stats().invalidations, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_over_corrupt_ledger_starts_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(crate::metadata::LEDGER_FILE), "{ torn")?;
        let source = dir.path().join("a.csv");
        std::fs::write(&source, "x\n1\n")?;

        let manager = ConversionManager::open(dir.path(), &EngineConfig::default())?;
        assert!(manager.store().get(&source).is_none());
        _ = manager.ensure_converted(&source).await?;
        assert_eq!(manager.conversions_performed(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_missing_forgets_deleted_sources() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let kept = dir.path().join("kept.csv");
        let gone = dir.path().join("gone.csv");
        std::fs::write(&kept, "a\n1\n")?;
        std::fs::write(&gone, "a\n2\n")?;
        let manager = ConversionManager::open(dir.path(), &EngineConfig::default())?;
        _ = manager.ensure_converted(&kept).await?;
        let doomed = manager.ensure_converted(&gone).await?;

        std::fs::remove_file(&gone)?;
        let removed = manager.prune_missing().await?;
        assert_eq!(removed, vec![doomed.clone()]);
        assert!(!doomed.artifact_path.exists());
        assert_eq!(manager.store().len(), 1);
        assert!(!manager.store().is_dirty());

        let reopened = ConversionManager::open(dir.path(), &EngineConfig::default())?;
        assert_eq!(reopened.store().len(), 1);
        Ok(())
    }
}
