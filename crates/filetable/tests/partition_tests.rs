// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use arrow::array::{Array, Int64Array};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use filetable::{
    ArtifactReader, ConversionManager, ConversionMetadataStore, ConverterRegistry, EngineConfig,
    NativeArtifactReader, PartitionLiteral, PartitionPredicate, RefreshableTable,
    StorageCacheManager, TableSource,
};
use futures::TryStreamExt;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

/// Counts the artifacts actually opened for rows
#[derive(Debug, Default)]
struct RecordingReader {
    inner: NativeArtifactReader,
    opened: Mutex<Vec<PathBuf>>,
}

impl ArtifactReader for RecordingReader {
    fn read(&self, path: &Path, schema: &SchemaRef) -> filetable::Result<Vec<RecordBatch>> {
        self.opened.lock().push(path.to_path_buf());
        self.inner.read(path, schema)
    }

    fn read_schema(&self, path: &Path) -> filetable::Result<SchemaRef> {
        self.inner.read_schema(path)
    }
}

fn table_over(root: &Path, reader: Arc<dyn ArtifactReader>) -> RefreshableTable {
    let config = EngineConfig::default();
    let manager = Arc::new(ConversionManager::new(
        Arc::new(ConversionMetadataStore::open(root)),
        Arc::new(ConverterRegistry::with_defaults()),
        Arc::new(StorageCacheManager::new(config.cache_max_bytes)),
        &config,
    ));
    RefreshableTable::new("readings", TableSource::directory(root), manager, reader, &config)
}

fn write_year_month(root: &Path) -> Result<()> {
    for (year, month, rows) in [
        (2023, 11, "depth\n1\n2\n"),
        (2023, 12, "depth\n3\n"),
        (2024, 1, "depth\n4\n5\n6\n"),
        (2024, 2, "depth\n7\n"),
    ] {
        let dir = root.join(format!("year={year}/month={month:02}"));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("data.csv"), rows)?;
    }
    Ok(())
}

#[tokio::test]
async fn test_year_month_layout_becomes_typed_columns() -> Result<()> {
    let dir = tempdir()?;
    write_year_month(dir.path())?;
    let table = table_over(dir.path(), Arc::new(NativeArtifactReader::default()));

    let snapshot = table.refresh().await?;
    let keys: Vec<&str> = snapshot.keys.iter().map(|k| k.name.as_str()).collect();
    assert_eq!(keys, vec!["year", "month"]);
    assert_eq!(snapshot.num_partitions(), 4);

    let schema = table.schema();
    assert_eq!(schema.field_with_name("year")?.data_type(), &DataType::Int64);
    assert_eq!(schema.field_with_name("month")?.data_type(), &DataType::Int64);
    assert_eq!(
        schema.fields().iter().map(|f| f.name().as_str()).collect::<Vec<_>>(),
        vec!["depth", "year", "month"]
    );

    let batches: Vec<RecordBatch> = table.scan(&PartitionPredicate::True).await.try_collect().await?;
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    assert_eq!(rows, 7);
    Ok(())
}

#[tokio::test]
async fn test_pruned_partitions_are_never_opened() -> Result<()> {
    let dir = tempdir()?;
    write_year_month(dir.path())?;
    let reader = Arc::new(RecordingReader::default());
    let table = table_over(dir.path(), reader.clone());
    _ = table.refresh().await?;

    let predicate = PartitionPredicate::eq("year", PartitionLiteral::Integer(2024))
        .and(PartitionPredicate::Gt("month".into(), PartitionLiteral::Integer(1)));
    let batches: Vec<RecordBatch> = table.scan(&predicate).await.try_collect().await?;

    let opened = reader.opened.lock().clone();
    assert_eq!(opened.len(), 1);

    assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
    let batch = &batches[0];
    let year = batch
        .column_by_name("year")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| anyhow::anyhow!("missing year column"))?;
    assert_eq!(year.value(0), 2024);
    assert!(!year.is_null(0));
    Ok(())
}

#[tokio::test]
async fn test_swapped_key_order_fails_the_refresh() -> Result<()> {
    let dir = tempdir()?;
    std::fs::create_dir_all(dir.path().join("year=2024/month=01"))?;
    std::fs::create_dir_all(dir.path().join("month=02/year=2024"))?;
    std::fs::write(dir.path().join("year=2024/month=01/a.csv"), "v\n1\n")?;
    std::fs::write(dir.path().join("month=02/year=2024/b.csv"), "v\n2\n")?;
    let table = table_over(dir.path(), Arc::new(NativeArtifactReader::default()));

    let err = table.refresh().await.err().ok_or_else(|| anyhow::anyhow!("refresh succeeded"))?;
    assert!(matches!(err.root(), filetable::Error::AmbiguousPartitionLayout { .. }));
    assert_eq!(table.current_snapshot().num_partitions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_empty_partition_scans_to_nothing() -> Result<()> {
    let dir = tempdir()?;
    write_year_month(dir.path())?;
    std::fs::create_dir_all(dir.path().join("year=2025/month=01"))?;
    let reader = Arc::new(RecordingReader::default());
    let table = table_over(dir.path(), reader.clone());

    let snapshot = table.refresh().await?;
    assert_eq!(snapshot.num_partitions(), 5);
    assert_eq!(snapshot.num_artifacts(), 4);

    let only_2025 = PartitionPredicate::eq("year", PartitionLiteral::Integer(2025));
    let batches: Vec<RecordBatch> = table.scan(&only_2025).await.try_collect().await?;
    assert!(batches.is_empty());
    assert!(reader.opened.lock().is_empty());
    Ok(())
}
