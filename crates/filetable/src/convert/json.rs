// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! JSON documents and JSON lines via arrow-json
//!
//! - `[{...}, ...]` is one table.
//! - `{"a": [{...}], "b": [{...}]}` is one table per array-valued member.
//! - A lone object is a one-row table.
//! - `.jsonl` / `.ndjson` are one table, one row per line.
//!
//! Array elements that are not objects are wrapped as `{"value": ...}`.

use super::{ConvertOptions, DecodedTable};
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use arrow_json::ReaderBuilder;
use arrow_json::reader::{infer_json_schema, infer_json_schema_from_iterator};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl JsonConverter {
    pub const EXTENSIONS: &'static [&'static str] = &["json", "jsonl", "ndjson"];

    pub fn decode(&self, path: &Path, options: &ConvertOptions) -> Result<Vec<DecodedTable>> {
        let is_lines = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jsonl") || e.eq_ignore_ascii_case("ndjson"));
        if is_lines {
            return decode_lines(path, options).map(|t| vec![t]);
        }

        let file = File::open(path)?;
        let document: Value = serde_json::from_reader(BufReader::new(file))?;
        match document {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(Error::conversion(path, "json", "empty JSON array"));
                }
                Ok(vec![decode_rows(None, items, options)?])
            }
            Value::Object(members) => {
                let has_tables = members
                    .values()
                    .any(|v| matches!(v, Value::Array(a) if !a.is_empty()));
                if has_tables {
                    members
                        .into_iter()
                        .filter_map(|(name, value)| match value {
                            Value::Array(items) if !items.is_empty() => Some((name, items)),
                            _ => None,
                        })
                        .map(|(name, items)| decode_rows(Some(name), items, options))
                        .collect()
                } else {
                    Ok(vec![decode_rows(None, vec![Value::Object(members)], options)?])
                }
            }
            _ => Err(Error::conversion(
                path,
                "json",
                "expected a JSON array or object at top level",
            )),
        }
    }
}

fn as_row(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => {
            let mut row = Map::new();
            _ = row.insert("value".to_string(), other);
            Value::Object(row)
        }
    }
}

fn decode_rows(
    name: Option<String>,
    items: Vec<Value>,
    options: &ConvertOptions,
) -> Result<DecodedTable> {
    let rows: Vec<Value> = items.into_iter().map(as_row).collect();
    let schema = Arc::new(infer_json_schema_from_iterator(
        rows.iter().take(options.schema_infer_max_records).map(Ok),
    )?);

    let mut decoder = ReaderBuilder::new(schema.clone())
        .with_batch_size(options.batch_size)
        .build_decoder()?;
    let mut batches: Vec<RecordBatch> = Vec::new();
    for chunk in rows.chunks(options.batch_size) {
        decoder.serialize(chunk)?;
        if let Some(batch) = decoder.flush()? {
            batches.push(batch);
        }
    }

    Ok(DecodedTable {
        name,
        schema,
        batches,
    })
}

fn decode_lines(path: &Path, options: &ConvertOptions) -> Result<DecodedTable> {
    let mut file = File::open(path)?;
    let (schema, _) = infer_json_schema(
        BufReader::new(&file),
        Some(options.schema_infer_max_records),
    )?;
    let schema = Arc::new(schema);
    _ = file.seek(SeekFrom::Start(0))?;

    let reader = ReaderBuilder::new(schema.clone())
        .with_batch_size(options.batch_size)
        .build(BufReader::new(file))?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(DecodedTable {
        name: None,
        schema,
        batches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn decode(name: &str, body: &str) -> anyhow::Result<Vec<DecodedTable>> {
        let dir = tempdir()?;
        let path = dir.path().join(name);
        std::fs::write(&path, body)?;
        Ok(JsonConverter.decode(&path, &ConvertOptions::default())?)
    }

    fn rows(table: &DecodedTable) -> usize {
        table.batches.iter().map(|b| b.num_rows()).sum()
    }

    #[test]
    fn test_array_of_objects() -> anyhow::Result<()> {
        let tables = decode("a.json", r#"[{"id": 1, "name": "x"}, {"id": 2}]"#)?;
        assert_eq!(tables.len(), 1);
        assert!(tables[0].name.is_none());
        assert_eq!(rows(&tables[0]), 2);
        assert!(tables[0].schema.field_with_name("name").is_ok());
        Ok(())
    }

    #[test]
    fn test_object_of_arrays_is_multi_table() -> anyhow::Result<()> {
        let tables = decode(
            "a.json",
            r#"{"meta": "ignored", "orders": [{"id": 1}], "items": [{"sku": "a"}, {"sku": "b"}]}"#,
        )?;
        let names: Vec<_> = tables.iter().filter_map(|t| t.name.clone()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"orders".to_string()));
        assert!(names.contains(&"items".to_string()));
        Ok(())
    }

    #[test]
    fn test_lone_object_and_scalars() -> anyhow::Result<()> {
        let tables = decode("a.json", r#"{"id": 1, "name": "x"}"#)?;
        assert_eq!(rows(&tables[0]), 1);

        let tables = decode("b.json", "[1, 2, 3]")?;
        assert_eq!(tables[0].schema.field(0).name(), "value");
        assert_eq!(rows(&tables[0]), 3);
        Ok(())
    }

    #[test]
    fn test_json_lines() -> anyhow::Result<()> {
        let tables = decode("events.ndjson", "{\"a\": 1}\n{\"a\": 2, \"b\": \"x\"}\n")?;
        assert_eq!(rows(&tables[0]), 2);
        assert_eq!(tables[0].schema.fields().len(), 2);
        Ok(())
    }

    #[test]
    fn test_rejects_scalar_document() {
        assert!(decode("a.json", "42").is_err());
        assert!(decode("a.json", "[]").is_err());
    }
}
