// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration
//!
//! A flat set of named options with defaults. Loading it from a file is the
//! caller's business; every field deserializes with serde so any format works.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Subdirectory (under the ledger directory) holding converted artifacts
pub const DEFAULT_ARTIFACT_SUBDIR: &str = ".filetable/artifacts";

/// Encoding of converted artifacts, and the decoder used to scan them
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEngine {
    /// Parquet artifacts
    #[default]
    Parquet,
    /// Arrow IPC file artifacts
    Arrow,
}

impl ExecutionEngine {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            ExecutionEngine::Parquet => "parquet",
            ExecutionEngine::Arrow => "arrow",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.extension()
    }
}

impl std::str::FromStr for ExecutionEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parquet" => Ok(ExecutionEngine::Parquet),
            "arrow" | "ipc" => Ok(ExecutionEngine::Arrow),
            other => Err(format!("unknown engine '{other}'")),
        }
    }
}

/// Configuration for conversion, partition discovery, caching and refresh
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Artifact encoding (default: parquet)
    #[serde(default)]
    pub engine: ExecutionEngine,
    /// Byte budget of the decoded batch cache; 0 disables it (default: 256 MiB)
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: usize,
    /// Snapshot TTL in seconds; unset means refresh only on demand
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
    /// Deepest directory level that may carry a partition key (default: 8)
    #[serde(default = "default_partition_max_depth")]
    pub partition_max_depth: usize,
    /// Include a SHA-256 content hash in source fingerprints (default: false)
    #[serde(default)]
    pub hash_contents: bool,
    /// Where artifacts are written; unset means `<ledger dir>/.filetable/artifacts`
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    /// Rows per decoded batch (default: 8192)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Rows sampled for delimited/JSON schema inference (default: 1000)
    #[serde(default = "default_schema_infer_max_records")]
    pub schema_infer_max_records: usize,
    /// Conversions run concurrently during a refresh pass (default: 4)
    #[serde(default = "default_conversion_parallelism")]
    pub conversion_parallelism: usize,
    /// Converter ids in registration order; unset means the default order
    #[serde(default)]
    pub converters: Option<Vec<String>>,
}

fn default_cache_max_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_partition_max_depth() -> usize {
    8
}

fn default_batch_size() -> usize {
    8192
}

fn default_schema_infer_max_records() -> usize {
    1000
}

fn default_conversion_parallelism() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: ExecutionEngine::default(),
            cache_max_bytes: default_cache_max_bytes(),
            refresh_interval_secs: None,
            partition_max_depth: default_partition_max_depth(),
            hash_contents: false,
            artifact_dir: None,
            batch_size: default_batch_size(),
            schema_infer_max_records: default_schema_infer_max_records(),
            conversion_parallelism: default_conversion_parallelism(),
            converters: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.map(Duration::from_secs)
    }

    /// Artifact directory for a ledger living in `ledger_dir`
    #[must_use]
    pub fn artifact_dir_for(&self, ledger_dir: &Path) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| ledger_dir.join(DEFAULT_ARTIFACT_SUBDIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_options() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"engine": "arrow", "refresh_interval_secs": 30}"#)
                .expect("valid config");
        assert_eq!(config.engine, ExecutionEngine::Arrow);
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.cache_max_bytes, 256 * 1024 * 1024);
        assert_eq!(config.partition_max_depth, 8);
        assert!(!config.hash_contents);
        assert!(config.converters.is_none());
    }

    #[test]
    fn test_artifact_dir_default() {
        let config = EngineConfig::default();
        assert_eq!(
            config.artifact_dir_for(Path::new("/data")),
            PathBuf::from("/data/.filetable/artifacts")
        );
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!("Parquet".parse::<ExecutionEngine>(), Ok(ExecutionEngine::Parquet));
        assert_eq!("ipc".parse::<ExecutionEngine>(), Ok(ExecutionEngine::Arrow));
        assert!("duckdb".parse::<ExecutionEngine>().is_err());
    }
}
