// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use filetable::{EngineConfig, FileSchema, TableSource};

use crate::common::{display_relative, source_dir};

/// List the tables `dir` binds to, with their schemas, and what was skipped.
pub async fn tables_command(dir: &Path, config: &EngineConfig, out: &mut impl Write) -> Result<()> {
    let dir = source_dir(dir)?;
    let schema = FileSchema::discover(&dir, config).await?;

    for (name, table) in schema.tables() {
        let snapshot = table.current_snapshot();
        let origin = match table.source() {
            TableSource::File { path, .. } => display_relative(path, &dir),
            TableSource::Directory { root } => format!("{}/", display_relative(root, &dir)),
        };
        writeln!(
            out,
            "{name} <- {origin} ({} partitions, {} artifacts)",
            snapshot.num_partitions(),
            snapshot.num_artifacts()
        )?;
        for field in snapshot.schema.fields() {
            let nullable = if field.is_nullable() { "" } else { " not null" };
            writeln!(out, "  {}: {}{nullable}", field.name(), field.data_type())?;
        }
    }

    for skipped in schema.skipped() {
        writeln!(out, "skipped {}: {}", display_relative(&skipped.path, &dir), skipped.reason)?;
    }
    Ok(())
}
