// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use cmd::commands::{
    OutputFormat, convert_command, partitions_command, prune_command, query_command, tables_command,
};
use cmd::common::EngineArgs;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "filetable")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    engine: EngineArgs,

    /// Log level (off, error, warn, info, debug); overrides FILETABLE_LOG
    #[arg(long, global = true)]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every supported file under a directory
    Convert {
        /// Directory of source files
        dir: PathBuf,
    },
    /// Show the partition layout of a directory
    Partitions {
        /// Directory to inspect
        dir: PathBuf,
        /// Deepest directory level that may carry a partition key
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// List the tables a directory binds to
    Tables {
        /// Directory to bind
        dir: PathBuf,
    },
    /// Run SQL over a directory registered as schema `files`
    Query {
        /// Directory to bind
        dir: PathBuf,
        /// SQL, e.g. "SELECT * FROM files.readings"
        sql: String,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Forget deleted sources and remove their artifacts
    Prune {
        /// Directory whose ledger is pruned
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.log {
        Some(level) => diagnostics::init_with_level(level),
        None => diagnostics::init_diagnostics(),
    }

    let config = cli.engine.to_config();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Commands::Convert { dir } => {
            let failed = convert_command(dir, &config, &mut out).await?;
            if failed > 0 {
                return Err(anyhow!("{failed} files failed to convert"));
            }
        }
        Commands::Partitions { dir, max_depth } => {
            partitions_command(dir, *max_depth, &config, &mut out).await?;
        }
        Commands::Tables { dir } => tables_command(dir, &config, &mut out).await?,
        Commands::Query { dir, sql, format } => {
            query_command(dir, sql, *format, &config, &mut out).await?;
        }
        Commands::Prune { dir } => {
            _ = prune_command(dir, &config, &mut out).await?;
        }
    }
    out.flush()?;
    Ok(())
}
