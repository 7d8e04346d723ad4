// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::{Result, anyhow};
use arrow_csv::WriterBuilder;
use clap::ValueEnum;
use datafusion::prelude::SessionContext;
use filetable::{EngineConfig, FileSchemaFactory};
use futures::StreamExt;

use crate::common::source_dir;

/// Schema name the directory is registered under
pub const SCHEMA_NAME: &str = "files";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table
    #[default]
    Table,
    /// CSV with a header row
    Csv,
}

/// Run `sql` against `dir`, registered as schema `files`.
pub async fn query_command(
    dir: &Path,
    sql: &str,
    format: OutputFormat,
    config: &EngineConfig,
    out: &mut impl Write,
) -> Result<()> {
    let dir = source_dir(dir)?;
    let ctx = SessionContext::new();
    let schema = FileSchemaFactory::new(config.clone())
        .register(&ctx, SCHEMA_NAME, &dir)
        .await?;
    for skipped in schema.skipped() {
        let path = skipped.path.display().to_string();
        let reason = skipped.reason.clone();
        diagnostics::warn!("Not queryable: {path}: {reason}", path: &path, reason: &reason);
    }

    diagnostics::debug!("Executing SQL query: {sql}", sql: sql);
    let df = ctx
        .sql(sql)
        .await
        .map_err(|e| anyhow!("Failed to plan query: {e}"))?;

    match format {
        OutputFormat::Table => {
            let batches = df
                .collect()
                .await
                .map_err(|e| anyhow!("Failed to execute query: {e}"))?;
            if batches.is_empty() {
                writeln!(out, "No results found.")?;
                return Ok(());
            }
            let formatted = arrow::util::pretty::pretty_format_batches(&batches)?;
            writeln!(out, "{formatted}")?;
        }
        OutputFormat::Csv => {
            let mut stream = df
                .execute_stream()
                .await
                .map_err(|e| anyhow!("Failed to execute query: {e}"))?;
            let mut writer = WriterBuilder::new().with_header(true).build(&mut *out);
            while let Some(batch) = stream.next().await {
                writer.write(&batch?)?;
            }
        }
    }
    Ok(())
}
