// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Args;
use filetable::{EngineConfig, ExecutionEngine};

/// Engine options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Byte budget of the decoded batch cache (0 disables it)
    #[arg(long, global = true)]
    pub cache_bytes: Option<usize>,

    /// Artifact encoding: parquet or arrow
    #[arg(long, global = true)]
    pub engine: Option<ExecutionEngine>,

    /// Directory for converted artifacts (default: <dir>/.filetable/artifacts)
    #[arg(long, global = true)]
    pub artifact_dir: Option<PathBuf>,

    /// Include a content hash in source fingerprints
    #[arg(long, global = true)]
    pub hash_contents: bool,
}

impl EngineArgs {
    #[must_use]
    pub fn to_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(bytes) = self.cache_bytes {
            config.cache_max_bytes = bytes;
        }
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        config.artifact_dir = self.artifact_dir.clone();
        config.hash_contents = self.hash_contents;
        config
    }
}

/// The directory a command works on, which must exist
pub fn source_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }
    Ok(dir.to_path_buf())
}

/// Every visible file below `dir`, sorted, outside `skip`
pub fn walk_files(dir: &Path, skip: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.') && !e.path().starts_with(skip));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// `path` relative to `base` for display
#[must_use]
pub fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}
