// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! PowerPoint decks (pptx): one table per `<a:tbl>`, in slide order

use super::ooxml::{Package, parse_xml, table_grid, top_level_tables};
use super::rows::grid_to_table;
use super::{ConvertOptions, DecodedTable};
use crate::Result;
use std::path::Path;

const ID: &str = "presentation";

#[derive(Debug, Clone, Copy, Default)]
pub struct PresentationConverter;

impl PresentationConverter {
    pub const EXTENSIONS: &'static [&'static str] = &["pptx"];

    pub fn decode(&self, path: &Path, options: &ConvertOptions) -> Result<Vec<DecodedTable>> {
        let mut package = Package::open(path, ID)?;

        // slide10 sorts after slide9
        let mut slides: Vec<(usize, String)> = package
            .part_names()
            .into_iter()
            .filter_map(|name| slide_number(&name).map(|n| (n, name)))
            .collect();
        slides.sort();

        let mut tables = Vec::new();
        for (number, part) in slides {
            let xml = package.require_part(&part, ID)?;
            let doc = parse_xml(path, ID, &xml)?;
            for (idx, table) in top_level_tables(doc.root_element()).into_iter().enumerate() {
                let name = format!("slide{number}_table{}", idx + 1);
                if let Some(decoded) =
                    grid_to_table(Some(name), table_grid(table), options.batch_size)?
                {
                    tables.push(decoded);
                }
            }
        }
        Ok(tables)
    }
}

fn slide_number(part: &str) -> Option<usize> {
    part.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ooxml::testutil::write_package;

    fn slide(rows: &[&[&str]]) -> String {
        let rows: String = rows
            .iter()
            .map(|cells| {
                let cells: String = cells
                    .iter()
                    .map(|c| format!("<a:tc><a:txBody><a:p><a:r><a:t>{c}</a:t></a:r></a:p></a:txBody></a:tc>"))
                    .collect();
                format!("<a:tr>{cells}</a:tr>")
            })
            .collect();
        format!(
            r#"<p:sld xmlns:p="urn:p" xmlns:a="urn:a"><p:cSld><p:spTree><p:graphicFrame><a:graphic><a:graphicData>
            <a:tbl>{rows}</a:tbl></a:graphicData></a:graphic></p:graphicFrame></p:spTree></p:cSld></p:sld>"#
        )
    }

    #[test]
    fn test_tables_follow_numeric_slide_order() -> anyhow::Result<()> {
        let s2 = slide(&[&["metric", "value"], &["users", "10"]]);
        let s10 = slide(&[&["quarter"], &["Q1"], &["Q2"]]);
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("deck.pptx");
        write_package(
            &path,
            &[
                ("ppt/slides/slide10.xml", s10.as_str()),
                ("ppt/slides/slide2.xml", s2.as_str()),
                ("ppt/slides/_rels/slide2.xml.rels", "<Relationships/>"),
            ],
        )?;

        let tables = PresentationConverter.decode(&path, &ConvertOptions::default())?;
        let names: Vec<_> = tables.iter().filter_map(|t| t.name.as_deref()).collect();
        assert_eq!(names, vec!["slide2_table1", "slide10_table1"]);
        assert_eq!(tables[1].batches[0].num_rows(), 2);
        Ok(())
    }

    #[test]
    fn test_slide_number() {
        assert_eq!(slide_number("ppt/slides/slide12.xml"), Some(12));
        assert_eq!(slide_number("ppt/slides/_rels/slide1.xml.rels"), None);
        assert_eq!(slide_number("ppt/slideLayouts/slideLayout1.xml"), None);
    }
}
