// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! One logical table over the per-partition artifacts of a snapshot
//!
//! Pruning happens before anything is opened: partitions rejected by the
//! predicate never reach the artifact reader. Each surviving artifact is
//! served from the batch cache when possible and otherwise decoded on a
//! blocking worker. Batches are then aligned to the table schema: absent
//! columns become nulls and partition columns are appended as constants.

use super::BatchStream;
use super::snapshot::{PartitionEntry, TableSnapshot};
use crate::artifact::ArtifactReader;
use crate::cache::StorageCacheManager;
use crate::metadata::ArtifactRef;
use crate::partition::{PartitionLiteral, PartitionPredicate, PartitionValue};
use crate::{Error, Result};
use arrow::array::{ArrayRef, new_null_array};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PartitionedTable {
    snapshot: Arc<TableSnapshot>,
    reader: Arc<dyn ArtifactReader>,
    cache: Arc<StorageCacheManager>,
}

impl PartitionedTable {
    #[must_use]
    pub fn new(
        snapshot: Arc<TableSnapshot>,
        reader: Arc<dyn ArtifactReader>,
        cache: Arc<StorageCacheManager>,
    ) -> Self {
        Self {
            snapshot,
            reader,
            cache,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> &Arc<TableSnapshot> {
        &self.snapshot
    }

    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.snapshot.schema.clone()
    }

    /// Partitions that survive pruning by `predicate`, in order
    #[must_use]
    pub fn pruned_partitions(&self, predicate: &PartitionPredicate) -> Vec<&PartitionEntry> {
        self.snapshot
            .partitions
            .iter()
            .filter(|entry| predicate.evaluate(&entry.partition))
            .collect()
    }

    /// Lazily stream every row of the partitions `predicate` keeps.
    #[must_use]
    pub fn scan(&self, predicate: &PartitionPredicate) -> BatchStream {
        self.scan_with(predicate, None, None)
    }

    /// Like [`PartitionedTable::scan`], projecting each batch to the
    /// `projection` column indices of the table schema and stopping after
    /// `limit` rows.
    #[must_use]
    pub fn scan_with(
        &self,
        predicate: &PartitionPredicate,
        projection: Option<Vec<usize>>,
        limit: Option<usize>,
    ) -> BatchStream {
        let kept: Vec<usize> = self
            .snapshot
            .partitions
            .iter()
            .enumerate()
            .filter(|(_, entry)| predicate.evaluate(&entry.partition))
            .map(|(idx, _)| idx)
            .collect();

        let total = self.snapshot.partitions.len();
        let scanned = kept.len();
        diagnostics::debug!("Scanning {scanned} of {total} partitions", scanned: scanned, total: total);

        let snapshot = self.snapshot.clone();
        let reader = self.reader.clone();
        let cache = self.cache.clone();

        let stream = async_stream::stream! {
            let mut remaining = limit;
            'partitions: for idx in kept {
                let entry = &snapshot.partitions[idx];
                for artifact in &entry.artifacts {
                    if remaining == Some(0) {
                        break 'partitions;
                    }
                    let batches = match load_artifact(&reader, &cache, artifact, &snapshot.data_schema).await {
                        Ok(batches) => batches,
                        Err(e) => {
                            yield Err(e);
                            break 'partitions;
                        }
                    };
                    for batch in batches.iter() {
                        if remaining == Some(0) {
                            break 'partitions;
                        }
                        let aligned = align_batch(batch, &snapshot, &entry.partition).and_then(|b| {
                            match &projection {
                                Some(indices) => Ok(b.project(indices)?),
                                None => Ok(b),
                            }
                        });
                        match aligned {
                            Ok(mut out) => {
                                if let Some(n) = remaining {
                                    if out.num_rows() > n {
                                        out = out.slice(0, n);
                                    }
                                    remaining = Some(n - out.num_rows());
                                }
                                yield Ok(out);
                            }
                            Err(e) => {
                                yield Err(e);
                                break 'partitions;
                            }
                        }
                    }
                }
            }
        };
        Box::pin(stream)
    }
}

/// Batches of one artifact, from the cache or decoded and cached
async fn load_artifact(
    reader: &Arc<dyn ArtifactReader>,
    cache: &Arc<StorageCacheManager>,
    artifact: &ArtifactRef,
    schema: &SchemaRef,
) -> Result<Arc<[RecordBatch]>> {
    let path_str = artifact.artifact_path.display().to_string();
    if let Some(hit) = cache.get(&artifact.artifact_fingerprint) {
        diagnostics::debug!("Batch cache hit for {path}", path: &path_str);
        return Ok(hit);
    }
    diagnostics::debug!("Batch cache miss for {path}", path: &path_str);

    let reader = reader.clone();
    let path = artifact.artifact_path.clone();
    let schema = schema.clone();
    let batches = tokio::task::spawn_blocking(move || reader.read(&path, &schema))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("artifact read task failed: {e}"))))??;

    let batches: Arc<[RecordBatch]> = Arc::from(batches);
    cache.put(artifact.artifact_fingerprint.clone(), batches.clone());
    Ok(batches)
}

/// Shape `batch` to the snapshot schema
fn align_batch(
    batch: &RecordBatch,
    snapshot: &TableSnapshot,
    partition: &PartitionValue,
) -> Result<RecordBatch> {
    let rows = batch.num_rows();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(snapshot.schema.fields().len());

    for field in snapshot.data_schema.fields() {
        let column = match batch.column_by_name(field.name()) {
            Some(col) if col.data_type() == field.data_type() => col.clone(),
            Some(col) => arrow::compute::cast(col, field.data_type())?,
            None => new_null_array(field.data_type(), rows),
        };
        columns.push(column);
    }

    for key in &snapshot.keys {
        let literal = partition.get(&key.name).unwrap_or(&PartitionLiteral::Null);
        columns.push(literal.to_array(key.inferred_type, rows));
    }

    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    Ok(RecordBatch::try_new_with_options(
        snapshot.schema.clone(),
        columns,
        &options,
    )?)
}
