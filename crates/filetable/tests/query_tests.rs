// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use datafusion::physical_plan::ExecutionPlan;
use datafusion::prelude::SessionContext;
use filetable::{EngineConfig, FileScanExec, FileSchemaFactory};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn write_pond(root: &Path) -> Result<()> {
    std::fs::write(root.join("flows.csv"), "site,flow\nnorth,1.5\nsouth,2.0\nnorth,0.5\n")?;
    for (year, rows) in [(2023, "depth\n1\n2\n"), (2024, "depth\n3\n4\n5\n")] {
        let dir = root.join(format!("wells/year={year}"));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("depths.csv"), rows)?;
    }
    Ok(())
}

fn find_scans(plan: &Arc<dyn ExecutionPlan>, found: &mut Vec<usize>) {
    if let Some(scan) = plan.as_any().downcast_ref::<FileScanExec>() {
        found.push(scan.partitions_scanned());
    }
    for child in plan.children() {
        find_scans(child, found);
    }
}

fn single_i64(batches: &[RecordBatch]) -> Result<i64> {
    let column = batches
        .first()
        .map(|b| b.column(0).clone())
        .ok_or_else(|| anyhow::anyhow!("no result batches"))?;
    let values = column
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| anyhow::anyhow!("expected an Int64 column"))?;
    Ok(values.value(0))
}

#[tokio::test]
async fn test_sql_over_registered_directory() -> Result<()> {
    let dir = tempdir()?;
    write_pond(dir.path())?;
    let ctx = SessionContext::new();
    let schema = FileSchemaFactory::new(EngineConfig::default())
        .register(&ctx, "files", dir.path())
        .await?;

    let mut names = schema.tables().map(|(name, _)| name.clone()).collect::<Vec<_>>();
    names.sort();
    assert_eq!(names, vec!["flows", "wells"]);

    let batches = ctx
        .sql("SELECT site, SUM(flow) AS total FROM files.flows GROUP BY site ORDER BY site")
        .await?
        .collect()
        .await?;
    let batch = &batches[0];
    let sites = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow::anyhow!("expected Utf8 sites"))?;
    let totals = batch
        .column(1)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow::anyhow!("expected Float64 totals"))?;
    assert_eq!(sites.value(0), "north");
    assert!((totals.value(0) - 2.0).abs() < f64::EPSILON);
    assert_eq!(sites.value(1), "south");
    assert_eq!(sites.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_partition_filter_prunes_the_physical_scan() -> Result<()> {
    let dir = tempdir()?;
    write_pond(dir.path())?;
    let ctx = SessionContext::new();
    _ = FileSchemaFactory::default()
        .register(&ctx, "files", dir.path())
        .await?;

    let df = ctx
        .sql("SELECT COUNT(*) FROM files.wells WHERE year = 2024")
        .await?;
    let plan = df.clone().create_physical_plan().await?;
    let mut scans = Vec::new();
    find_scans(&plan, &mut scans);
    assert_eq!(scans, vec![1]);

    let batches = df.collect().await?;
    assert_eq!(single_i64(&batches)?, 3);

    let all = ctx.sql("SELECT COUNT(*) FROM files.wells").await?.collect().await?;
    assert_eq!(single_i64(&all)?, 5);
    Ok(())
}

#[tokio::test]
async fn test_new_partition_is_visible_after_mark_all_stale() -> Result<()> {
    let dir = tempdir()?;
    write_pond(dir.path())?;
    let ctx = SessionContext::new();
    let schema = FileSchemaFactory::default()
        .register(&ctx, "files", dir.path())
        .await?;

    std::fs::create_dir_all(dir.path().join("wells/year=2025"))?;
    std::fs::write(dir.path().join("wells/year=2025/depths.csv"), "depth\n6\n")?;
    schema.mark_all_stale();

    let batches = ctx
        .sql("SELECT COUNT(*) FROM files.wells WHERE year >= 2024")
        .await?
        .collect()
        .await?;
    assert_eq!(single_i64(&batches)?, 4);
    Ok(())
}
