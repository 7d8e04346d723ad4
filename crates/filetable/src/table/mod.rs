// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Tables over converted artifacts

pub mod partitioned;
pub mod refreshable;
pub mod snapshot;

pub use partitioned::PartitionedTable;
pub use refreshable::{RefreshState, RefreshableTable};
pub use snapshot::{PartitionEntry, TableSnapshot, merge_schemas};

use crate::Result;
use arrow::record_batch::RecordBatch;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;

/// Lazy stream of row batches produced by a scan
pub type BatchStream = Pin<Box<dyn Stream<Item = Result<RecordBatch>> + Send>>;

/// What a table is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    /// One table of one source file; `None` selects its primary table
    File { path: PathBuf, table: Option<String> },
    /// The primary table of every data file under `root`, partition-aware
    Directory { root: PathBuf },
}

impl TableSource {
    #[must_use]
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        TableSource::File {
            path: path.into(),
            table: None,
        }
    }

    #[must_use]
    pub fn directory<P: Into<PathBuf>>(root: P) -> Self {
        TableSource::Directory { root: root.into() }
    }
}
