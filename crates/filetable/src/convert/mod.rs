// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Format converters
//!
//! A [`Converter`] turns one source file into one or more columnar
//! artifacts. Converters are consulted in registration order by the
//! [`ConverterRegistry`]; the first whose `can_handle` accepts a path
//! converts it.
//!
//! Single-table sources produce a table named after the file stem.
//! Sources holding several tables (JSON objects of arrays, workbooks,
//! documents, slide decks, pages with several tables) name each table
//! `<stem>__<table>`.

pub mod delimited;
pub mod document;
pub mod html;
pub mod json;
pub mod markdown;
pub mod native;
pub mod ooxml;
pub mod presentation;
pub mod rows;
pub mod spreadsheet;

use crate::artifact::write_artifact;
use crate::config::{EngineConfig, ExecutionEngine};
use crate::fingerprint::FileFingerprint;
use crate::metadata::ConverterParams;
use crate::{Error, Result};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub use delimited::DelimitedConverter;
pub use document::DocumentConverter;
pub use html::HtmlConverter;
pub use json::JsonConverter;
pub use markdown::MarkdownConverter;
pub use native::NativeConverter;
pub use presentation::PresentationConverter;
pub use spreadsheet::SpreadsheetConverter;

/// Converter ids in default registration order
pub const DEFAULT_CONVERTERS: [&str; 8] = [
    "native",
    "delimited",
    "json",
    "spreadsheet",
    "document",
    "presentation",
    "markdown",
    "html",
];

/// Options shared by every converter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub engine: ExecutionEngine,
    pub batch_size: usize,
    pub schema_infer_max_records: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ConvertOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            engine: config.engine,
            batch_size: config.batch_size.max(1),
            schema_infer_max_records: config.schema_infer_max_records.max(1),
        }
    }
}

/// One decoded table of a source file
#[derive(Debug, Clone)]
pub struct DecodedTable {
    /// Name within the source (sheet, JSON member, ...), if it has one
    pub name: Option<String>,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

/// Where the artifacts of one conversion go.
///
/// File names are `<stem>-<digest>[__table].<ext>`, where the digest covers
/// the source fingerprint and the conversion parameters, so artifacts of
/// different source versions never collide.
#[derive(Debug, Clone)]
pub struct ArtifactDestination {
    dir: PathBuf,
    stem: String,
    digest: String,
    engine: ExecutionEngine,
}

impl ArtifactDestination {
    #[must_use]
    pub fn new(
        dir: &Path,
        source: &FileFingerprint,
        params: &ConverterParams,
        engine: ExecutionEngine,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.digest().as_bytes());
        for (k, v) in params {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b";");
        }
        let digest = hex::encode(hasher.finalize())[..16].to_string();

        Self {
            dir: dir.to_path_buf(),
            stem: table_stem(&source.path),
            digest,
            engine,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn engine(&self) -> ExecutionEngine {
        self.engine
    }

    #[must_use]
    pub fn artifact_path(&self, table: Option<&str>) -> PathBuf {
        let ext = self.engine.extension();
        let name = match table {
            Some(table) => format!("{}-{}__{table}.{ext}", self.stem, self.digest),
            None => format!("{}-{}.{ext}", self.stem, self.digest),
        };
        self.dir.join(name)
    }
}

/// A table produced by a conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedTable {
    pub table_name: String,
    pub artifact_path: PathBuf,
}

/// Result of one conversion; `tables[0]` is the primary table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub converter_id: &'static str,
    pub tables: Vec<ProducedTable>,
}

/// Lowercase `[a-z0-9_]` identifier; never empty, never starts with a digit.
#[must_use]
pub fn sanitize_table_name(raw: &str) -> String {
    let mut out: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    let out = out.trim_matches('_').to_string();
    if out.is_empty() {
        "table".to_string()
    } else if out.starts_with(|c: char| c.is_ascii_digit()) {
        format!("t_{out}")
    } else {
        out
    }
}

/// Table name of a single-table source
#[must_use]
pub fn table_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    sanitize_table_name(&stem)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Format-specific converter
#[derive(Debug, Clone)]
pub enum Converter {
    Native(NativeConverter),
    Delimited(DelimitedConverter),
    Json(JsonConverter),
    Spreadsheet(SpreadsheetConverter),
    Document(DocumentConverter),
    Presentation(PresentationConverter),
    Markdown(MarkdownConverter),
    Html(HtmlConverter),
}

impl Converter {
    pub fn from_id(id: &str) -> Result<Self> {
        Ok(match id {
            "native" => Converter::Native(NativeConverter),
            "delimited" => Converter::Delimited(DelimitedConverter),
            "json" => Converter::Json(JsonConverter),
            "spreadsheet" => Converter::Spreadsheet(SpreadsheetConverter),
            "document" => Converter::Document(DocumentConverter),
            "presentation" => Converter::Presentation(PresentationConverter),
            "markdown" => Converter::Markdown(MarkdownConverter),
            "html" => Converter::Html(HtmlConverter),
            other => {
                return Err(Error::UnknownConverter {
                    id: other.to_string(),
                });
            }
        })
    }

    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Converter::Native(_) => "native",
            Converter::Delimited(_) => "delimited",
            Converter::Json(_) => "json",
            Converter::Spreadsheet(_) => "spreadsheet",
            Converter::Document(_) => "document",
            Converter::Presentation(_) => "presentation",
            Converter::Markdown(_) => "markdown",
            Converter::Html(_) => "html",
        }
    }

    #[must_use]
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Converter::Native(_) => NativeConverter::EXTENSIONS,
            Converter::Delimited(_) => DelimitedConverter::EXTENSIONS,
            Converter::Json(_) => JsonConverter::EXTENSIONS,
            Converter::Spreadsheet(_) => SpreadsheetConverter::EXTENSIONS,
            Converter::Document(_) => DocumentConverter::EXTENSIONS,
            Converter::Presentation(_) => PresentationConverter::EXTENSIONS,
            Converter::Markdown(_) => MarkdownConverter::EXTENSIONS,
            Converter::Html(_) => HtmlConverter::EXTENSIONS,
        }
    }

    #[must_use]
    pub fn can_handle(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }

    /// Whether the artifact is the source file itself
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Converter::Native(_))
    }

    /// Parameters that determine this converter's output for `path`.
    /// A change in parameters makes an existing conversion stale.
    #[must_use]
    pub fn params(&self, path: &Path, options: &ConvertOptions) -> ConverterParams {
        let mut params = ConverterParams::new();
        if self.is_passthrough() {
            return params;
        }
        _ = params.insert("engine".into(), options.engine.as_str().into());
        _ = params.insert("batch_size".into(), options.batch_size.to_string());
        match self {
            Converter::Delimited(_) => {
                let delimiter = DelimitedConverter::delimiter_for(path);
                _ = params.insert("delimiter".into(), (delimiter as char).to_string());
                _ = params.insert("header".into(), "true".into());
                _ = params.insert(
                    "schema_infer_max_records".into(),
                    options.schema_infer_max_records.to_string(),
                );
            }
            Converter::Json(_) => {
                _ = params.insert(
                    "schema_infer_max_records".into(),
                    options.schema_infer_max_records.to_string(),
                );
            }
            _ => {}
        }
        params
    }

    fn decode(&self, source: &Path, options: &ConvertOptions) -> Result<Vec<DecodedTable>> {
        match self {
            Converter::Native(_) => Ok(Vec::new()),
            Converter::Delimited(c) => c.decode(source, options),
            Converter::Json(c) => c.decode(source, options),
            Converter::Spreadsheet(c) => c.decode(source, options),
            Converter::Document(c) => c.decode(source, options),
            Converter::Presentation(c) => c.decode(source, options),
            Converter::Markdown(c) => c.decode(source, options),
            Converter::Html(c) => c.decode(source, options),
        }
    }

    /// Convert `source`, writing artifacts under `destination`.
    ///
    /// Any failure is reported as `ConversionFailure` naming this converter.
    pub fn convert(
        &self,
        source: &Path,
        destination: &ArtifactDestination,
        options: &ConvertOptions,
    ) -> Result<ArtifactDescriptor> {
        let id = self.id();
        let stem = table_stem(source);

        if let Converter::Native(native) = self {
            let table = native
                .passthrough(source, &stem)
                .map_err(|e| as_conversion_failure(source, id, e))?;
            return Ok(ArtifactDescriptor {
                converter_id: id,
                tables: vec![table],
            });
        }

        let tables = self
            .decode(source, options)
            .map_err(|e| as_conversion_failure(source, id, e))?;
        if tables.is_empty() {
            return Err(Error::conversion(source, id, "no tables found"));
        }

        let multi = tables.len() > 1;
        let mut used = HashSet::new();
        let mut produced = Vec::with_capacity(tables.len());
        for (idx, table) in tables.into_iter().enumerate() {
            let suffix = if multi {
                let raw = table
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("table{}", idx + 1));
                let base = sanitize_table_name(&raw);
                let mut name = base.clone();
                let mut n = 2;
                while !used.insert(name.clone()) {
                    name = format!("{base}_{n}");
                    n += 1;
                }
                Some(name)
            } else {
                None
            };

            let table_name = match &suffix {
                Some(suffix) => format!("{stem}__{suffix}"),
                None => stem.clone(),
            };
            let artifact_path = destination.artifact_path(suffix.as_deref());
            write_artifact(
                &artifact_path,
                &table.schema,
                &table.batches,
                destination.engine(),
            )
            .map_err(|e| as_conversion_failure(source, id, e))?;

            produced.push(ProducedTable {
                table_name,
                artifact_path,
            });
        }

        Ok(ArtifactDescriptor {
            converter_id: id,
            tables: produced,
        })
    }
}

fn as_conversion_failure(source: &Path, converter: &str, err: Error) -> Error {
    match err {
        Error::ConversionFailure { .. } => err,
        other => Error::conversion(source, converter, other.to_string()),
    }
}

/// Ordered set of converters; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct ConverterRegistry {
    converters: Vec<Converter>,
}

impl ConverterRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            converters: DEFAULT_CONVERTERS
                .iter()
                .filter_map(|id| Converter::from_id(id).ok())
                .collect(),
        }
    }

    /// A registry holding exactly `ids`, in that order.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self> {
        let converters = ids
            .iter()
            .map(|id| Converter::from_id(id.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { converters })
    }

    /// The registry described by `config.converters`, or the defaults.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        match &config.converters {
            Some(ids) => Self::from_ids(ids),
            None => Ok(Self::with_defaults()),
        }
    }

    pub fn push(&mut self, converter: Converter) {
        self.converters.push(converter);
    }

    #[must_use]
    pub fn find(&self, path: &Path) -> Option<&Converter> {
        self.converters.iter().find(|c| c.can_handle(path))
    }

    #[must_use]
    pub fn supports(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.converters.iter().map(Converter::id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}
