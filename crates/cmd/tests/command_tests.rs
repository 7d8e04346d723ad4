// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use cmd::commands::{
    OutputFormat, convert_command, partitions_command, prune_command, query_command, tables_command,
};
use filetable::EngineConfig;
use std::path::Path;
use tempfile::tempdir;

fn write_dir(root: &Path) -> Result<()> {
    std::fs::write(root.join("flows.csv"), "site,flow\nnorth,1.5\nsouth,2.5\n")?;
    for (year, rows) in [(2023, "depth\n1\n"), (2024, "depth\n2\n3\n")] {
        let dir = root.join(format!("wells/year={year}"));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("depths.csv"), rows)?;
    }
    Ok(())
}

fn text(out: Vec<u8>) -> Result<String> {
    Ok(String::from_utf8(out)?)
}

#[tokio::test]
async fn test_convert_reports_each_file() -> Result<()> {
    let dir = tempdir()?;
    write_dir(dir.path())?;
    std::fs::write(dir.path().join("broken.json"), "{")?;

    let mut out = Vec::new();
    let failed = convert_command(dir.path(), &EngineConfig::default(), &mut out).await?;
    let out = text(out)?;

    assert_eq!(failed, 1);
    assert!(out.contains("flows.csv: delimited -> flows"), "{out}");
    assert!(out.contains("wells/year=2024/depths.csv"), "{out}");
    assert!(out.contains("broken.json: FAILED"), "{out}");
    assert!(dir.path().join(".conversions.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_partitions_lists_keys() -> Result<()> {
    let dir = tempdir()?;
    write_dir(dir.path())?;

    let mut out = Vec::new();
    partitions_command(&dir.path().join("wells"), None, &EngineConfig::default(), &mut out).await?;
    let out = text(out)?;
    assert!(out.starts_with("keys: year (Int64)"), "{out}");
    assert!(out.contains("year=2023: 1 files"), "{out}");
    assert!(out.contains("year=2024: 1 files"), "{out}");
    Ok(())
}

#[tokio::test]
async fn test_tables_and_query() -> Result<()> {
    let dir = tempdir()?;
    write_dir(dir.path())?;
    let config = EngineConfig::default();

    let mut out = Vec::new();
    tables_command(dir.path(), &config, &mut out).await?;
    let out = text(out)?;
    assert!(out.contains("flows <- flows.csv"), "{out}");
    assert!(out.contains("wells <- wells/ (2 partitions"), "{out}");
    assert!(out.contains("  year: Int64"), "{out}");

    let mut out = Vec::new();
    query_command(
        dir.path(),
        "SELECT SUM(depth) AS total FROM files.wells WHERE year = 2024",
        OutputFormat::Csv,
        &config,
        &mut out,
    )
    .await?;
    assert_eq!(text(out)?, "total\n5\n");
    Ok(())
}

#[tokio::test]
async fn test_prune_drops_deleted_sources() -> Result<()> {
    let dir = tempdir()?;
    write_dir(dir.path())?;
    let config = EngineConfig::default();
    _ = convert_command(dir.path(), &config, &mut Vec::new()).await?;

    std::fs::remove_file(dir.path().join("flows.csv"))?;
    let mut out = Vec::new();
    let pruned = prune_command(dir.path(), &config, &mut out).await?;
    assert_eq!(pruned, 1);
    assert!(text(out)?.contains("pruned flows.csv"));
    Ok(())
}
