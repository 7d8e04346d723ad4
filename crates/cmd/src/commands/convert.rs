// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use filetable::{ConversionManager, EngineConfig};

use crate::common::{display_relative, source_dir, walk_files};

/// Convert every supported file under `dir`, one output line per file.
///
/// Returns the number of files that failed.
pub async fn convert_command(dir: &Path, config: &EngineConfig, out: &mut impl Write) -> Result<usize> {
    let dir = source_dir(dir)?;
    let manager = ConversionManager::open(&dir, config)?;
    let sources: Vec<_> = walk_files(&dir, manager.artifact_dir())?
        .into_iter()
        .filter(|path| manager.supports(path))
        .collect();

    let mut failed = 0;
    for (path, result) in manager.ensure_all(sources).await {
        let shown = display_relative(&path, &dir);
        match result {
            Ok(record) => {
                let tables: Vec<String> = record.artifacts().into_iter().map(|a| a.table_name).collect();
                writeln!(out, "{shown}: {} -> {}", record.converter_id, tables.join(", "))?;
            }
            Err(e) => {
                failed += 1;
                writeln!(out, "{shown}: FAILED {e}")?;
            }
        }
    }
    manager.persist_ledger().await?;

    let converted = manager.conversions_performed();
    diagnostics::info!("Converted {converted} files, {failed} failed", converted: converted, failed: failed);
    Ok(failed)
}
