// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Native columnar files are their own artifacts.

use super::ProducedTable;
use crate::artifact::{ArtifactReader, NativeArtifactReader};
use crate::Result;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConverter;

impl NativeConverter {
    pub const EXTENSIONS: &'static [&'static str] = &["parquet", "arrow", "feather"];

    /// Verify `source` decodes as a columnar file and name it as a table.
    pub fn passthrough(&self, source: &Path, table_name: &str) -> Result<ProducedTable> {
        _ = NativeArtifactReader::default().read_schema(source)?;
        Ok(ProducedTable {
            table_name: table_name.to_string(),
            artifact_path: source.to_path_buf(),
        })
    }
}
