// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Excel workbooks (xlsx, xlsm): one table per worksheet
//!
//! Worksheets are located through `xl/workbook.xml` and its relationships,
//! cells are placed by their `r` reference, and shared strings are resolved
//! from `xl/sharedStrings.xml`.

use super::ooxml::{Package, children_named, parse_xml, text_of};
use super::rows::grid_to_table;
use super::{ConvertOptions, DecodedTable};
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

const ID: &str = "spreadsheet";

/// Columns a worksheet can hold (`A` through `XFD`)
const MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadsheetConverter;

struct SheetRef {
    name: String,
    part: String,
}

impl SpreadsheetConverter {
    pub const EXTENSIONS: &'static [&'static str] = &["xlsx", "xlsm"];

    pub fn decode(&self, path: &Path, options: &ConvertOptions) -> Result<Vec<DecodedTable>> {
        let mut package = Package::open(path, ID)?;
        let shared = shared_strings(&mut package)?;
        let sheets = sheet_refs(&mut package)?;

        let mut tables = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            let Some(xml) = package.read_part(&sheet.part)? else {
                let part = sheet.part.clone();
                diagnostics::warn!("Worksheet part {part} is missing", part: part);
                continue;
            };
            let grid = sheet_grid(path, &xml, &shared)?;
            if let Some(table) = grid_to_table(Some(sheet.name), grid, options.batch_size)? {
                tables.push(table);
            }
        }
        Ok(tables)
    }
}

fn shared_strings(package: &mut Package) -> Result<Vec<String>> {
    let Some(xml) = package.read_part("xl/sharedStrings.xml")? else {
        return Ok(Vec::new());
    };
    let doc = parse_xml(package.path(), ID, &xml)?;
    Ok(children_named(doc.root_element(), "si")
        .map(|si| text_of(si, "t"))
        .collect())
}

/// Worksheets in workbook order, with their part names
fn sheet_refs(package: &mut Package) -> Result<Vec<SheetRef>> {
    let path = package.path().to_path_buf();

    let mut targets = HashMap::new();
    if let Some(rels) = package.read_part("xl/_rels/workbook.xml.rels")? {
        let doc = parse_xml(&path, ID, &rels)?;
        for rel in children_named(doc.root_element(), "Relationship") {
            if let (Some(id), Some(target)) = (rel.attribute("Id"), rel.attribute("Target")) {
                _ = targets.insert(id.to_string(), resolve_target(target));
            }
        }
    }

    let workbook = package.require_part("xl/workbook.xml", ID)?;
    let doc = parse_xml(&path, ID, &workbook)?;
    let sheets_node = children_named(doc.root_element(), "sheets")
        .next()
        .ok_or_else(|| Error::conversion(&path, ID, "workbook has no sheets"))?;

    let mut refs = Vec::new();
    for (idx, sheet) in children_named(sheets_node, "sheet").enumerate() {
        let name = sheet
            .attribute("name")
            .map(str::to_string)
            .unwrap_or_else(|| format!("sheet{}", idx + 1));
        // r:id lives in the relationships namespace
        let rel_id = sheet
            .attributes()
            .find(|a| a.name() == "id" && a.namespace().is_some())
            .map(|a| a.value().to_string());
        let part = rel_id
            .and_then(|id| targets.get(&id).cloned())
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", idx + 1));
        refs.push(SheetRef { name, part });
    }
    Ok(refs)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

/// Zero-based column index of a cell reference such as `AB12`
fn column_index(reference: &str) -> Option<usize> {
    let letters: String = reference
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    if letters.is_empty() {
        return None;
    }
    // Saturates instead of overflowing; callers reject anything past XFD
    let index = letters.chars().fold(0usize, |index, c| {
        index
            .saturating_mul(26)
            .saturating_add(c.to_ascii_uppercase() as usize - 'A' as usize + 1)
    });
    Some(index - 1)
}

fn cell_value(cell: roxmltree::Node<'_, '_>, shared: &[String]) -> String {
    let raw = children_named(cell, "v")
        .next()
        .and_then(|v| v.text())
        .unwrap_or("");
    match cell.attribute("t") {
        Some("s") => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("inlineStr") => children_named(cell, "is")
            .next()
            .map(|is| text_of(is, "t"))
            .unwrap_or_default(),
        Some("b") => match raw.trim() {
            "1" => "true".to_string(),
            "0" => "false".to_string(),
            _ => String::new(),
        },
        Some("e") => String::new(),
        _ => raw.to_string(),
    }
}

fn sheet_grid(path: &Path, xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>> {
    let doc = parse_xml(path, ID, xml)?;
    let Some(data) = children_named(doc.root_element(), "sheetData").next() else {
        return Ok(Vec::new());
    };

    let mut grid = Vec::new();
    for row in children_named(data, "row") {
        let mut cells: Vec<String> = Vec::new();
        for (pos, cell) in children_named(row, "c").enumerate() {
            let col = cell.attribute("r").and_then(column_index).unwrap_or(pos);
            if col >= MAX_COLUMNS {
                return Err(Error::conversion(
                    path,
                    ID,
                    format!(
                        "cell {} lies past the last worksheet column",
                        cell.attribute("r").unwrap_or("without a reference")
                    ),
                ));
            }
            if cells.len() <= col {
                cells.resize(col + 1, String::new());
            }
            cells[col] = cell_value(cell, shared);
        }
        grid.push(cells);
    }
    Ok(grid)
}
