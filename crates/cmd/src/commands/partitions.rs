// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use filetable::{ConverterRegistry, EngineConfig, PartitionDetector, PartitionLayout};

use crate::common::{display_relative, source_dir};

/// Print the partition keys and partitions detected under `dir`.
pub async fn partitions_command(
    dir: &Path,
    max_depth: Option<usize>,
    config: &EngineConfig,
    out: &mut impl Write,
) -> Result<()> {
    let dir = source_dir(dir)?;
    let registry = Arc::new(ConverterRegistry::from_config(config)?);
    let detector = PartitionDetector::new(max_depth.unwrap_or(config.partition_max_depth))
        .with_skip_dir(config.artifact_dir_for(&dir))
        .with_file_filter(move |path| registry.supports(path));

    let root = dir.clone();
    let layout = tokio::task::spawn_blocking(move || detector.detect(&root))
        .await
        .map_err(|e| anyhow!("partition detection task failed: {e}"))??;
    write_layout(&layout, &dir, out)
}

fn write_layout(layout: &PartitionLayout, dir: &Path, out: &mut impl Write) -> Result<()> {
    if !layout.is_partitioned() {
        writeln!(out, "unpartitioned, {} files", layout.files().count())?;
        return Ok(());
    }

    let keys: Vec<String> = layout
        .keys
        .iter()
        .map(|k| format!("{} ({})", k.name, k.inferred_type.data_type()))
        .collect();
    writeln!(out, "keys: {}", keys.join(", "))?;
    for partition in &layout.partitions {
        writeln!(out, "{partition}: {} files", partition.files.len())?;
        for file in &partition.files {
            writeln!(out, "  {}", display_relative(file, dir))?;
        }
    }
    Ok(())
}
