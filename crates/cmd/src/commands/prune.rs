// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use filetable::{ConversionManager, EngineConfig};

use crate::common::{display_relative, source_dir};

/// Drop ledger records and artifacts of sources that were deleted.
pub async fn prune_command(dir: &Path, config: &EngineConfig, out: &mut impl Write) -> Result<usize> {
    let dir = source_dir(dir)?;
    let manager = ConversionManager::open(&dir, config)?;
    let removed = manager.prune_missing().await?;
    for record in &removed {
        writeln!(out, "pruned {}", display_relative(record.source_path(), &dir))?;
    }
    writeln!(out, "{} records pruned, {} kept", removed.len(), manager.store().len())?;
    Ok(removed.len())
}
