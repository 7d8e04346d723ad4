// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! A directory as a DataFusion schema
//!
//! Every supported file directly under the base directory becomes a table
//! (one per contained table for multi-table sources), and every
//! subdirectory becomes one partition-aware table. A subtree that cannot
//! be bound is reported and skipped; its siblings still bind.

use crate::artifact::{ArtifactReader, NativeArtifactReader};
use crate::config::EngineConfig;
use crate::convert::sanitize_table_name;
use crate::manager::ConversionManager;
use crate::provider::FileTableProvider;
use crate::table::{RefreshableTable, TableSource};
use crate::{Error, Result};
use async_trait::async_trait;
use datafusion::catalog::SchemaProvider;
use datafusion::datasource::TableProvider;
use datafusion::error::{DataFusionError, Result as DataFusionResult};
use datafusion::prelude::SessionContext;
use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A source that was not bound, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct FileSchema {
    base_dir: PathBuf,
    manager: Arc<ConversionManager>,
    tables: BTreeMap<String, RefreshableTable>,
    skipped: Vec<SkippedSource>,
}

impl FileSchema {
    /// Bind every table under `base_dir`, converting as needed.
    ///
    /// The ledger lives in `base_dir`. Only a broken configuration or an
    /// unreadable `base_dir` fail discovery as a whole.
    pub async fn discover<P: AsRef<Path>>(base_dir: P, config: &EngineConfig) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let manager = Arc::new(ConversionManager::open(&base_dir, config)?);
        let reader: Arc<dyn ArtifactReader> = Arc::new(NativeArtifactReader::new(config.batch_size));

        let (files, dirs) = list_dir(&base_dir, manager.artifact_dir())?;
        let mut schema = Self {
            base_dir,
            manager: manager.clone(),
            tables: BTreeMap::new(),
            skipped: Vec::new(),
        };

        let supported: Vec<PathBuf> = files.into_iter().filter(|f| manager.supports(f)).collect();
        for (path, result) in manager.ensure_all(supported).await {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    schema.skip(path, &e);
                    continue;
                }
            };
            let artifacts = record.artifacts();
            let multi = artifacts.len() > 1;
            for artifact in artifacts {
                let source = TableSource::File {
                    path: path.clone(),
                    table: multi.then(|| artifact.table_name.clone()),
                };
                schema
                    .bind(&artifact.table_name, source, reader.clone(), config)
                    .await;
            }
        }

        for dir in dirs {
            let raw = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let name = sanitize_table_name(&raw);
            schema
                .bind(&name, TableSource::directory(&dir), reader.clone(), config)
                .await;
        }

        if let Err(e) = manager.persist_ledger().await {
            let err = e.to_string();
            diagnostics::warn!("Conversion ledger not persisted: {error}", error: &err);
        }

        let bound = schema.tables.len();
        let skipped = schema.skipped.len();
        let base = schema.base_dir.display().to_string();
        diagnostics::info!("Bound {bound} tables under {base} ({skipped} skipped)", bound: bound, base: &base, skipped: skipped);
        Ok(schema)
    }

    async fn bind(
        &mut self,
        name: &str,
        source: TableSource,
        reader: Arc<dyn ArtifactReader>,
        config: &EngineConfig,
    ) {
        let name = self.unique_name(name);
        let path = match &source {
            TableSource::File { path, .. } => path.clone(),
            TableSource::Directory { root } => root.clone(),
        };
        match RefreshableTable::open(name.clone(), source, self.manager.clone(), reader, config).await {
            Ok(table) => {
                _ = self.tables.insert(name, table);
            }
            Err(e) => self.skip(path, &e),
        }
    }

    fn unique_name(&self, name: &str) -> String {
        if !self.tables.contains_key(name) {
            return name.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{name}_{n}");
            if !self.tables.contains_key(&candidate) {
                diagnostics::warn!("Table name {name} is taken; binding as {candidate}", name: name, candidate: &candidate);
                return candidate;
            }
            n += 1;
        }
    }

    fn skip(&mut self, path: PathBuf, error: &Error) {
        let path_str = path.display().to_string();
        let reason = error.to_string();
        diagnostics::warn!("Skipping {path}: {reason}", path: &path_str, reason: &reason);
        self.skipped.push(SkippedSource { path, reason });
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<ConversionManager> {
        &self.manager
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RefreshableTable> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &RefreshableTable)> {
        self.tables.iter()
    }

    #[must_use]
    pub fn skipped(&self) -> &[SkippedSource] {
        &self.skipped
    }

    /// Make every table refresh before its next scan
    pub fn mark_all_stale(&self) {
        for table in self.tables.values() {
            table.mark_stale();
        }
    }
}

/// Visible files and subdirectories of `dir`, sorted, without `skip`
fn list_dir(dir: &Path, skip: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if name.starts_with('.') || name.starts_with('_') || path.starts_with(skip) {
            continue;
        }
        // Dangling links are not sources
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        let file_type = metadata.file_type();
        if file_type.is_dir() {
            dirs.push(path);
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    files.sort();
    dirs.sort();
    Ok((files, dirs))
}

#[async_trait]
impl SchemaProvider for FileSchema {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    async fn table(&self, name: &str) -> DataFusionResult<Option<Arc<dyn TableProvider>>> {
        let Some(table) = self.tables.get(name) else {
            return Ok(None);
        };
        table.ensure_fresh().await;
        Ok(Some(Arc::new(FileTableProvider::current(table.clone()))))
    }

    fn table_exist(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

/// Registers directories as schemas of a `SessionContext`
#[derive(Debug, Clone, Default)]
pub struct FileSchemaFactory {
    config: EngineConfig,
}

impl FileSchemaFactory {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Discover `base_dir` and register it as `schema_name` in the
    /// context's default catalog.
    pub async fn register<P: AsRef<Path>>(
        &self,
        ctx: &SessionContext,
        schema_name: &str,
        base_dir: P,
    ) -> Result<Arc<FileSchema>> {
        let schema = Arc::new(FileSchema::discover(base_dir, &self.config).await?);

        let catalog_name = ctx.state().config_options().catalog.default_catalog.clone();
        let catalog = ctx.catalog(&catalog_name).ok_or_else(|| {
            Error::DataFusion(DataFusionError::Plan(format!(
                "default catalog '{catalog_name}' is not registered"
            )))
        })?;
        _ = catalog.register_schema(schema_name, schema.clone())?;
        Ok(schema)
    }
}
