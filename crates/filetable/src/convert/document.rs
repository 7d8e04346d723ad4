// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Word documents (docx): one table per top-level `<w:tbl>`

use super::ooxml::{Package, parse_xml, table_grid, top_level_tables};
use super::rows::grid_to_table;
use super::{ConvertOptions, DecodedTable};
use crate::Result;
use std::path::Path;

const ID: &str = "document";

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentConverter;

impl DocumentConverter {
    pub const EXTENSIONS: &'static [&'static str] = &["docx"];

    pub fn decode(&self, path: &Path, options: &ConvertOptions) -> Result<Vec<DecodedTable>> {
        let mut package = Package::open(path, ID)?;
        let xml = package.require_part("word/document.xml", ID)?;
        let doc = parse_xml(path, ID, &xml)?;

        let mut tables = Vec::new();
        for (idx, table) in top_level_tables(doc.root_element()).into_iter().enumerate() {
            let name = format!("table{}", idx + 1);
            if let Some(decoded) = grid_to_table(Some(name), table_grid(table), options.batch_size)? {
                tables.push(decoded);
            }
        }
        Ok(tables)
    }
}
