// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Tables that follow their source files
//!
//! A `RefreshableTable` owns exactly one current [`TableSnapshot`]. A
//! refresh pass detects the layout, converts whatever changed, builds a
//! candidate snapshot and swaps it in; scans that started earlier keep the
//! snapshot they captured. Passes are coalesced per table: callers arriving
//! while one is running wait for it instead of starting another.

use super::partitioned::PartitionedTable;
use super::snapshot::{PartitionEntry, TableSnapshot, merge_schemas};
use super::{BatchStream, TableSource};
use crate::artifact::ArtifactReader;
use crate::config::EngineConfig;
use crate::flight::SingleFlight;
use crate::manager::ConversionManager;
use crate::metadata::{ArtifactRef, ConversionRecord};
use crate::partition::{PartitionDetector, PartitionLayout, PartitionPredicate, PartitionValue};
use crate::{Error, Result};
use arrow::datatypes::SchemaRef;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// The current snapshot reflects the sources as of the last pass
    Fresh,
    /// A refresh is due: never built, marked stale, failed, or past its TTL
    Stale,
    /// A pass is in flight
    Refreshing,
}

struct TableInner {
    name: String,
    source: TableSource,
    manager: Arc<ConversionManager>,
    reader: Arc<dyn ArtifactReader>,
    detector: PartitionDetector,
    refresh_interval: Mutex<Option<Duration>>,
    current: RwLock<Arc<TableSnapshot>>,
    stale: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
    deferred_error: Mutex<Option<Error>>,
    passes: AtomicUsize,
    flight: Arc<SingleFlight<(), Arc<TableSnapshot>>>,
}

#[derive(Clone)]
pub struct RefreshableTable {
    inner: Arc<TableInner>,
}

impl std::fmt::Debug for RefreshableTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshableTable")
            .field("name", &self.inner.name)
            .field("source", &self.inner.source)
            .field("state", &self.state())
            .finish()
    }
}

impl RefreshableTable {
    /// A table that has not been built yet; the first refresh (explicit or
    /// at the first scan) builds it.
    #[must_use]
    pub fn new<S: Into<String>>(
        name: S,
        source: TableSource,
        manager: Arc<ConversionManager>,
        reader: Arc<dyn ArtifactReader>,
        config: &EngineConfig,
    ) -> Self {
        let registry = manager.registry().clone();
        let detector = PartitionDetector::new(config.partition_max_depth)
            .with_skip_dir(manager.artifact_dir())
            .with_file_filter(move |path| registry.supports(path));

        Self {
            inner: Arc::new(TableInner {
                name: name.into(),
                source,
                manager,
                reader,
                detector,
                refresh_interval: Mutex::new(config.refresh_interval()),
                current: RwLock::new(Arc::new(TableSnapshot::empty())),
                stale: AtomicBool::new(true),
                last_refresh: Mutex::new(None),
                deferred_error: Mutex::new(None),
                passes: AtomicUsize::new(0),
                flight: Arc::new(SingleFlight::new()),
            }),
        }
    }

    /// Build a table and run its first refresh.
    pub async fn open<S: Into<String>>(
        name: S,
        source: TableSource,
        manager: Arc<ConversionManager>,
        reader: Arc<dyn ArtifactReader>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let table = Self::new(name, source, manager, reader, config);
        _ = table.refresh().await?;
        Ok(table)
    }

    /// Replace the TTL; `None` refreshes only on demand.
    pub fn set_refresh_interval(&self, interval: Option<Duration>) {
        *self.inner.refresh_interval.lock() = interval;
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn source(&self) -> &TableSource {
        &self.inner.source
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<ConversionManager> {
        &self.inner.manager
    }

    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.current_snapshot().schema.clone()
    }

    #[must_use]
    pub fn current_snapshot(&self) -> Arc<TableSnapshot> {
        self.inner.current.read().clone()
    }

    /// A scannable view of the current snapshot
    #[must_use]
    pub fn partitioned(&self) -> PartitionedTable {
        self.partitioned_at(self.current_snapshot())
    }

    /// A scannable view of `snapshot`, which need not be current
    #[must_use]
    pub fn partitioned_at(&self, snapshot: Arc<TableSnapshot>) -> PartitionedTable {
        PartitionedTable::new(
            snapshot,
            self.inner.reader.clone(),
            self.inner.manager.cache().clone(),
        )
    }

    #[must_use]
    pub fn state(&self) -> RefreshState {
        if self.inner.flight.is_in_flight(&()) {
            RefreshState::Refreshing
        } else if self.needs_refresh() {
            RefreshState::Stale
        } else {
            RefreshState::Fresh
        }
    }

    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        if self.inner.stale.load(Ordering::SeqCst) {
            return true;
        }
        match (*self.inner.last_refresh.lock(), *self.inner.refresh_interval.lock()) {
            (None, _) => true,
            (Some(at), Some(ttl)) => at.elapsed() >= ttl,
            (Some(_), None) => false,
        }
    }

    /// Signal that the sources changed; the next scan refreshes first.
    pub fn mark_stale(&self) {
        self.inner.stale.store(true, Ordering::SeqCst);
    }

    /// Refresh passes run to completion (successful or not) so far
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.inner.passes.load(Ordering::SeqCst)
    }

    /// The error of the last failed implicit refresh, if not yet taken
    pub fn take_refresh_error(&self) -> Option<Error> {
        self.inner.deferred_error.lock().take()
    }

    /// Bring the snapshot up to date with the sources.
    pub async fn refresh(&self) -> Result<Arc<TableSnapshot>> {
        self.refresh_with_cancel(CancellationToken::new()).await
    }

    /// Like [`RefreshableTable::refresh`], giving up with
    /// [`Error::Cancelled`] once `token` is cancelled.
    ///
    /// A caller that started the pass cancels the pass itself, which stops
    /// at its next stage boundary without touching the snapshot. A caller
    /// that joined a pass already in flight only stops waiting for it.
    pub async fn refresh_with_cancel(&self, token: CancellationToken) -> Result<Arc<TableSnapshot>> {
        loop {
            let inner = self.inner.clone();
            let pass_token = token.clone();
            let (started, pass) = self
                .inner
                .flight
                .spawn_or_join((), move || inner.refresh_pass(pass_token));

            let result = if started {
                pass.await
            } else {
                tokio::select! {
                    result = pass => result,
                    () = token.cancelled() => return Err(Error::Cancelled),
                }
            };

            // Joined a pass someone else cancelled: run our own
            match result {
                Err(e) if matches!(e.root(), Error::Cancelled) && !token.is_cancelled() => continue,
                other => return other,
            }
        }
    }

    /// Refresh if due. A failure is logged and kept for
    /// [`RefreshableTable::take_refresh_error`]; the current snapshot stays.
    pub async fn ensure_fresh(&self) {
        if !self.needs_refresh() {
            return;
        }
        if let Err(e) = self.refresh().await {
            let name = self.inner.name.clone();
            let err = e.to_string();
            diagnostics::warn!("Implicit refresh of table {name} failed, serving last good snapshot: {error}", name: &name, error: &err);
            *self.inner.deferred_error.lock() = Some(e);
        }
    }

    /// Scan the rows of the partitions `predicate` keeps, refreshing first
    /// when due.
    pub async fn scan(&self, predicate: &PartitionPredicate) -> BatchStream {
        self.ensure_fresh().await;
        self.partitioned().scan(predicate)
    }

    /// Refresh every `interval` until `shutdown` is cancelled.
    pub fn spawn_refresh_loop(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let table = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match table.refresh_with_cancel(shutdown.child_token()).await {
                            Ok(_) => {}
                            Err(e) if matches!(e.root(), Error::Cancelled) => break,
                            Err(e) => {
                                let name = table.inner.name.clone();
                                let err = e.to_string();
                                diagnostics::warn!("Scheduled refresh of table {name} failed: {error}", name: &name, error: &err);
                                *table.inner.deferred_error.lock() = Some(e);
                            }
                        }
                    }
                }
            }
        })
    }
}

impl TableInner {
    async fn refresh_pass(self: Arc<Self>, token: CancellationToken) -> Result<Arc<TableSnapshot>> {
        let name = self.name.clone();
        // A stale signal arriving during the pass must survive it
        let was_stale = self.stale.swap(false, Ordering::SeqCst);
        diagnostics::debug!("Refreshing table {name}", name: &name);

        let built = self.build_snapshot(&token).await;
        _ = self.passes.fetch_add(1, Ordering::SeqCst);

        let candidate = match built {
            Ok(candidate) if !token.is_cancelled() => candidate,
            Ok(_) => {
                self.restore_stale(was_stale);
                return Err(Error::Cancelled);
            }
            Err(e) if matches!(e.root(), Error::Cancelled) => {
                self.restore_stale(was_stale);
                return Err(e);
            }
            Err(e) => {
                self.restore_stale(true);
                let err = e.to_string();
                diagnostics::warn!("Refresh of table {name} failed: {error}", name: &name, error: &err);
                return Err(e);
            }
        };

        let (snapshot, swapped) = {
            let mut current = self.current.write();
            if current.same_content(&candidate) {
                (current.clone(), false)
            } else {
                *current = Arc::new(candidate);
                (current.clone(), true)
            }
        };
        *self.last_refresh.lock() = Some(Instant::now());

        let partitions = snapshot.num_partitions();
        if swapped {
            diagnostics::info!("Table {name} refreshed with {partitions} partitions", name: &name, partitions: partitions);
        } else {
            diagnostics::debug!("Table {name} unchanged", name: &name);
        }

        if let Err(e) = self.manager.persist_ledger().await {
            let err = e.to_string();
            diagnostics::warn!("Conversion ledger not persisted: {error}", error: &err);
        }
        Ok(snapshot)
    }

    fn restore_stale(&self, stale: bool) {
        if stale {
            self.stale.store(true, Ordering::SeqCst);
        }
    }

    async fn build_snapshot(&self, token: &CancellationToken) -> Result<TableSnapshot> {
        let layout = self.detect().await?;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let files: Vec<PathBuf> = layout.files().cloned().collect();
        let total = files.len();
        let results = tokio::select! {
            results = self.manager.ensure_all(files) => results,
            () = token.cancelled() => return Err(Error::Cancelled),
        };

        let mut records: BTreeMap<PathBuf, ConversionRecord> = BTreeMap::new();
        let mut failures = Vec::new();
        for (path, result) in results {
            match result {
                Ok(record) => {
                    _ = records.insert(path, record);
                }
                Err(e) => failures.push(format!("{}: {e}", path.display())),
            }
        }
        if let Some(first) = failures.first() {
            let failed = failures.len();
            return Err(Error::refresh(
                &self.name,
                format!("{failed} of {total} files failed to convert; first: {first}"),
            ));
        }

        let PartitionLayout {
            keys,
            partitions: detected,
            ..
        } = layout;

        let mut partitions = Vec::with_capacity(detected.len());
        for partition in detected {
            let mut artifacts = Vec::with_capacity(partition.files.len());
            for file in &partition.files {
                if let Some(record) = records.get(file) {
                    artifacts.push(self.select_artifact(record)?);
                }
            }
            partitions.push(PartitionEntry {
                partition,
                artifacts,
            });
        }

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let current = self.current.read().clone();
        let unchanged_artifacts = current.keys == keys
            && current
                .partitions
                .iter()
                .map(|p| &p.artifacts)
                .eq(partitions.iter().map(|p| &p.artifacts));

        let data_schema = if unchanged_artifacts && current.built_at_nanos != 0 {
            current.data_schema.as_ref().clone()
        } else {
            let paths: BTreeSet<PathBuf> = partitions
                .iter()
                .flat_map(|p| p.artifacts.iter().map(|a| a.artifact_path.clone()))
                .collect();
            let reader = self.reader.clone();
            tokio::task::spawn_blocking(move || {
                let schemas = paths
                    .iter()
                    .map(|path| reader.read_schema(path))
                    .collect::<Result<Vec<SchemaRef>>>()?;
                Ok::<_, Error>(merge_schemas(&schemas))
            })
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("schema task failed: {e}"))))??
        };

        Ok(TableSnapshot::build(keys, partitions, records, &data_schema))
    }

    async fn detect(&self) -> Result<PartitionLayout> {
        match &self.source {
            TableSource::Directory { root } => {
                let detector = self.detector.clone();
                let root = root.clone();
                tokio::task::spawn_blocking(move || detector.detect(&root))
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(format!("detect task failed: {e}"))))?
            }
            TableSource::File { path, .. } => Ok(PartitionLayout {
                root: path.parent().map(|p| p.to_path_buf()).unwrap_or_default(),
                keys: Vec::new(),
                partitions: vec![PartitionValue {
                    values: Vec::new(),
                    relative_dir: PathBuf::new(),
                    files: vec![path.clone()],
                }],
            }),
        }
    }

    /// The artifact of `record` this table reads
    fn select_artifact(&self, record: &ConversionRecord) -> Result<ArtifactRef> {
        match &self.source {
            TableSource::File {
                table: Some(table), ..
            } => record
                .artifacts()
                .into_iter()
                .find(|a| a.table_name == *table)
                .ok_or_else(|| {
                    Error::refresh(
                        &self.name,
                        format!(
                            "{} no longer contains table '{table}'",
                            record.source_path().display()
                        ),
                    )
                }),
            _ => Ok(ArtifactRef {
                table_name: record.table_name.clone(),
                artifact_path: record.artifact_path.clone(),
                artifact_fingerprint: record.artifact_fingerprint.clone(),
            }),
        }
    }
}
