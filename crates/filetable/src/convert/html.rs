// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! HTML tables: one table per `<table>` element
//!
//! Rows are `<tr>` elements; cells are `<th>` or `<td>`. A `<table>`
//! nested inside another table's cell contributes to that cell's text.

use super::rows::grid_to_table;
use super::{ConvertOptions, DecodedTable};
use crate::{Error, Result};
use std::path::Path;

const ID: &str = "html";

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlConverter;

impl HtmlConverter {
    pub const EXTENSIONS: &'static [&'static str] = &["html", "htm"];

    pub fn decode(&self, path: &Path, options: &ConvertOptions) -> Result<Vec<DecodedTable>> {
        let bytes = std::fs::read(path)?;
        let html = String::from_utf8_lossy(&bytes);
        let dom = tl::parse(&html, tl::ParserOptions::default())
            .map_err(|e| Error::conversion(path, ID, format!("HTML parse error: {e}")))?;
        let parser = dom.parser();

        let mut found = Vec::new();
        collect_tables(dom.children(), parser, &mut found);

        let mut tables = Vec::new();
        for (idx, handle) in found.into_iter().enumerate() {
            let name = handle
                .attributes()
                .id()
                .map(|id| id.as_utf8_str().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("table{}", idx + 1));

            let grid = table_rows(handle, parser);
            if let Some(table) = grid_to_table(Some(name), grid, options.batch_size)? {
                tables.push(table);
            }
        }
        Ok(tables)
    }
}

fn is_named(tag: &tl::HTMLTag<'_>, name: &str) -> bool {
    tag.name().as_utf8_str().eq_ignore_ascii_case(name)
}

/// Outermost `<table>` elements in document order
fn collect_tables<'p, 'buf>(
    handles: &[tl::NodeHandle],
    parser: &'p tl::Parser<'buf>,
    out: &mut Vec<&'p tl::HTMLTag<'buf>>,
) {
    for handle in handles {
        let Some(tag) = handle.get(parser).and_then(|n| n.as_tag()) else {
            continue;
        };
        if is_named(tag, "table") {
            out.push(tag);
        } else {
            let children: Vec<tl::NodeHandle> = tag.children().top().iter().copied().collect();
            collect_tables(&children, parser, out);
        }
    }
}

/// Child elements of `tag`, skipping text and comments
fn child_tags<'p, 'buf>(
    tag: &tl::HTMLTag<'buf>,
    parser: &'p tl::Parser<'buf>,
) -> Vec<&'p tl::HTMLTag<'buf>> {
    tag.children()
        .top()
        .iter()
        .filter_map(|h| h.get(parser))
        .filter_map(|n| n.as_tag())
        .collect()
}

/// `<tr>` rows of a table, looking through `<thead>`, `<tbody>` and `<tfoot>`
fn table_rows<'buf>(table: &tl::HTMLTag<'buf>, parser: &tl::Parser<'buf>) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for child in child_tags(table, parser) {
        if is_named(child, "tr") {
            rows.push(row_cells(child, parser));
        } else if ["thead", "tbody", "tfoot"].iter().any(|s| is_named(child, s)) {
            for row in child_tags(child, parser).into_iter().filter(|t| is_named(t, "tr")) {
                rows.push(row_cells(row, parser));
            }
        }
    }
    rows
}

fn row_cells<'buf>(row: &tl::HTMLTag<'buf>, parser: &tl::Parser<'buf>) -> Vec<String> {
    child_tags(row, parser)
        .into_iter()
        .filter(|t| is_named(t, "td") || is_named(t, "th"))
        .map(|cell| {
            let text = cell.inner_text(parser);
            decode_entities(text.split_whitespace().collect::<Vec<_>>().join(" "))
        })
        .collect()
}

fn decode_entities(text: String) -> String {
    if !text.contains('&') {
        return text;
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, StringArray};

    #[test]
    fn test_tables_with_sections_and_ids() -> anyhow::Result<()> {
        let html = r#"<html><body>
          <table id="Prices">
            <thead><tr><th>item</th><th>price</th></tr></thead>
            <tbody>
              <tr><td>bolt</td><td>0.25</td></tr>
              <tr><td>nut &amp; washer</td><td>0.10</td></tr>
            </tbody>
          </table>
          <p>between</p>
          <table><tr><td>k</td></tr><tr><td>1</td></tr></table>
        </body></html>"#;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("page.html");
        std::fs::write(&path, html)?;

        let tables = HtmlConverter.decode(&path, &ConvertOptions::default())?;
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name.as_deref(), Some("Prices"));
        assert_eq!(tables[1].name.as_deref(), Some("table2"));

        let batch = &tables[0].batches[0];
        assert_eq!(batch.num_rows(), 2);
        let items = batch.column(0).as_any().downcast_ref::<StringArray>().expect("items");
        assert_eq!(items.value(1), "nut & washer");
        assert!(!items.is_null(0));
        Ok(())
    }
}
