// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Artifact encoding and decoding
//!
//! Artifacts are written to a temporary file in the destination directory
//! and renamed into place, so readers only ever see complete files.
//! Decoding goes through [`ArtifactReader`], the seam where an external
//! engine binding can take over: given an artifact path and its declared
//! schema, produce row batches.

use crate::config::ExecutionEngine;
use crate::{Error, Result};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;

/// Decodes artifacts into row batches.
pub trait ArtifactReader: Send + Sync + std::fmt::Debug {
    /// Decode every batch of the artifact at `path`, declared to have `schema`.
    fn read(&self, path: &Path, schema: &SchemaRef) -> Result<Vec<RecordBatch>>;

    /// Schema of the artifact at `path`, without decoding rows.
    fn read_schema(&self, path: &Path) -> Result<SchemaRef>;
}

/// Decodes Parquet and Arrow IPC artifacts in-process, choosing by extension.
#[derive(Debug, Clone)]
pub struct NativeArtifactReader {
    batch_size: usize,
}

impl NativeArtifactReader {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl Default for NativeArtifactReader {
    fn default() -> Self {
        Self::new(8192)
    }
}

/// Engine implied by an artifact's file extension
#[must_use]
pub fn engine_for_path(path: &Path) -> Option<ExecutionEngine> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "parquet" => Some(ExecutionEngine::Parquet),
        "arrow" | "feather" | "ipc" => Some(ExecutionEngine::Arrow),
        _ => None,
    }
}

impl ArtifactReader for NativeArtifactReader {
    fn read(&self, path: &Path, _schema: &SchemaRef) -> Result<Vec<RecordBatch>> {
        let file = File::open(path)?;
        match engine_for_path(path) {
            Some(ExecutionEngine::Parquet) => {
                let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
                    .with_batch_size(self.batch_size)
                    .build()?;
                Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
            }
            Some(ExecutionEngine::Arrow) => {
                let reader = arrow::ipc::reader::FileReader::try_new(file, None)?;
                Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
            }
            None => Err(Error::unsupported_format(path)),
        }
    }

    fn read_schema(&self, path: &Path) -> Result<SchemaRef> {
        let file = File::open(path)?;
        match engine_for_path(path) {
            Some(ExecutionEngine::Parquet) => {
                let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
                Ok(builder.schema().clone())
            }
            Some(ExecutionEngine::Arrow) => {
                let reader = arrow::ipc::reader::FileReader::try_new(file, None)?;
                Ok(reader.schema())
            }
            None => Err(Error::unsupported_format(path)),
        }
    }
}

/// Write `batches` to `path` in the given encoding, atomically.
pub fn write_artifact(
    path: &Path,
    schema: &SchemaRef,
    batches: &[RecordBatch],
    engine: ExecutionEngine,
) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io(std::io::Error::other("artifact path has no parent")))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    match engine {
        ExecutionEngine::Parquet => {
            let props = WriterProperties::builder().build();
            let mut writer = ArrowWriter::try_new(tmp.as_file_mut(), schema.clone(), Some(props))?;
            for batch in batches {
                writer.write(batch)?;
            }
            _ = writer.close()?;
        }
        ExecutionEngine::Arrow => {
            let mut writer = arrow::ipc::writer::FileWriter::try_new(tmp.as_file_mut(), schema)?;
            for batch in batches {
                writer.write(batch)?;
            }
            writer.finish()?;
        }
    }
    tmp.as_file().sync_all()?;
    _ = tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sample() -> (SchemaRef, RecordBatch) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .expect("batch");
        (schema, batch)
    }

    #[test]
    fn test_parquet_and_ipc_artifacts_decode() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (schema, batch) = sample();
        let reader = NativeArtifactReader::new(2);

        for engine in [ExecutionEngine::Parquet, ExecutionEngine::Arrow] {
            let path = dir.path().join(format!("t.{}", engine.extension()));
            write_artifact(&path, &schema, std::slice::from_ref(&batch), engine)?;

            assert_eq!(reader.read_schema(&path)?.fields().len(), 2);
            let rows: usize = reader.read(&path, &schema)?.iter().map(|b| b.num_rows()).sum();
            assert_eq!(rows, 3);
        }
        Ok(())
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let reader = NativeArtifactReader::default();
        let (schema, _) = sample();
        let err = reader.read(Path::new("/nope/t.xyz"), &schema).expect_err("missing");
        // Opening fails first for a missing file; the extension check is exercised by engine_for_path
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(engine_for_path(Path::new("t.xyz")), None);
        assert_eq!(engine_for_path(Path::new("t.PARQUET")), Some(ExecutionEngine::Parquet));
    }
}
