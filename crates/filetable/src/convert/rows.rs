// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Cell grid to Arrow
//!
//! Every cell-oriented source (worksheets, document and slide tables,
//! Markdown and HTML tables) ends up as rows of strings. The first row is
//! the header; column types are inferred over the non-empty cells.

use super::DecodedTable;
use crate::Result;
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::collections::HashSet;
use std::sync::Arc;

/// Build a table from a header row followed by data rows.
///
/// Returns `None` when `grid` has no header row. Rows that are entirely
/// empty are dropped; short rows are padded with empty cells.
pub fn grid_to_table(
    name: Option<String>,
    grid: Vec<Vec<String>>,
    batch_size: usize,
) -> Result<Option<DecodedTable>> {
    let mut rows = grid
        .into_iter()
        .map(|row| row.into_iter().map(|c| c.trim().to_string()).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|c| !c.is_empty()));

    let Some(header) = rows.next() else {
        return Ok(None);
    };
    let data: Vec<Vec<String>> = rows.collect();

    let width = data.iter().map(Vec::len).chain([header.len()]).max().unwrap_or(0);
    let names = unique_headers(&header, width);

    let fields: Vec<Field> = names
        .iter()
        .enumerate()
        .map(|(idx, name)| Field::new(name, infer_column_type(&data, idx), true))
        .collect();
    let schema: SchemaRef = Arc::new(Schema::new(fields));

    let mut batches = Vec::new();
    for chunk in data.chunks(batch_size.max(1)) {
        batches.push(rows_to_batch(schema.clone(), chunk)?);
    }

    Ok(Some(DecodedTable {
        name,
        schema,
        batches,
    }))
}

/// Header names, made non-empty and unique: blanks become `column_N`
/// (1-based position), repeats become `name_2`, `name_3`, ...
#[must_use]
pub fn unique_headers(header: &[String], width: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(width);
    for idx in 0..width {
        let raw = header.get(idx).map(|s| s.trim()).unwrap_or("");
        let base = if raw.is_empty() {
            format!("column_{}", idx + 1)
        } else {
            raw.to_string()
        };
        let mut name = base.clone();
        let mut n = 2;
        while !seen.insert(name.clone()) {
            name = format!("{base}_{n}");
            n += 1;
        }
        names.push(name);
    }
    names
}

fn cell(row: &[String], idx: usize) -> Option<&str> {
    row.get(idx).map(|s| s.as_str()).filter(|s| !s.is_empty())
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Int64, then Float64, then Boolean, then Utf8: the first type every
/// non-empty cell parses as. A column with no values is Utf8.
fn infer_column_type(rows: &[Vec<String>], idx: usize) -> DataType {
    let mut values = rows.iter().filter_map(|r| cell(r, idx)).peekable();
    if values.peek().is_none() {
        return DataType::Utf8;
    }
    let values: Vec<&str> = values.collect();
    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        DataType::Int64
    } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        DataType::Float64
    } else if values.iter().all(|v| parse_bool(v).is_some()) {
        DataType::Boolean
    } else {
        DataType::Utf8
    }
}

fn rows_to_batch(schema: SchemaRef, rows: &[Vec<String>]) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());

    for (idx, field) in schema.fields().iter().enumerate() {
        let column: ArrayRef = match field.data_type() {
            DataType::Int64 => Arc::new(Int64Array::from_iter(
                rows.iter().map(|r| cell(r, idx).and_then(|v| v.parse::<i64>().ok())),
            )),
            DataType::Float64 => Arc::new(Float64Array::from_iter(
                rows.iter().map(|r| cell(r, idx).and_then(|v| v.parse::<f64>().ok())),
            )),
            DataType::Boolean => Arc::new(BooleanArray::from_iter(
                rows.iter().map(|r| cell(r, idx).and_then(parse_bool)),
            )),
            _ => Arc::new(StringArray::from_iter(rows.iter().map(|r| cell(r, idx)))),
        };
        columns.push(column);
    }

    Ok(RecordBatch::try_new(schema, columns)?)
}
