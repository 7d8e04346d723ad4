// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Filetable: directories of heterogeneous files as refreshable,
//! partition-aware tables
//!
//! Source files are converted once into columnar artifacts and converted
//! again only when they change. Tables are immutable snapshots over those
//! artifacts, swapped atomically on refresh, and exposed to DataFusion
//! through [`FileSchema`].

pub mod artifact;
pub mod cache;
pub mod config;
pub mod convert;
mod error;
pub mod fingerprint;
pub mod flight;
pub mod manager;
pub mod metadata;
pub mod partition;
pub mod provider;
pub mod schema;
pub mod table;

pub use artifact::{ArtifactReader, NativeArtifactReader};
pub use cache::{CacheStats, StorageCacheManager};
pub use config::{EngineConfig, ExecutionEngine};
pub use convert::{Converter, ConverterRegistry};
pub use error::{Error, Result};
pub use fingerprint::FileFingerprint;
pub use manager::ConversionManager;
pub use metadata::{ArtifactRef, ConversionMetadataStore, ConversionRecord, ConverterParams};
pub use partition::{
    PartitionDetector, PartitionKey, PartitionLayout, PartitionLiteral, PartitionPredicate,
    PartitionType, PartitionValue,
};
pub use provider::{FileScanExec, FileTableProvider};
pub use schema::{FileSchema, FileSchemaFactory, SkippedSource};
pub use table::{
    BatchStream, PartitionEntry, PartitionedTable, RefreshState, RefreshableTable, TableSnapshot,
    TableSource,
};
