// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for Office Open XML packages (xlsx, docx, pptx).

use crate::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// An opened OOXML zip package
pub struct Package {
    path: std::path::PathBuf,
    archive: ZipArchive<File>,
}

impl Package {
    pub fn open(path: &Path, converter: &str) -> Result<Self> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(file)
            .map_err(|e| Error::conversion(path, converter, format!("not a zip package: {e}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    /// Read a part as UTF-8. Returns `Ok(None)` when the part isn't present.
    pub fn read_part(&mut self, name: &str) -> Result<Option<String>> {
        match self.archive.by_name(name) {
            Ok(mut entry) => {
                let mut buf = String::new();
                _ = entry.read_to_string(&mut buf)?;
                Ok(Some(buf))
            }
            Err(zip::result::ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(Error::conversion(
                &self.path,
                "ooxml",
                format!("failed to read {name}: {e}"),
            )),
        }
    }

    /// Like [`Package::read_part`], but a missing part is an error.
    pub fn require_part(&mut self, name: &str, converter: &str) -> Result<String> {
        self.read_part(name)?.ok_or_else(|| {
            Error::conversion(&self.path, converter, format!("missing package part {name}"))
        })
    }

    /// Part names, in archive order
    pub fn part_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn parse_xml<'a>(
    path: &Path,
    converter: &str,
    text: &'a str,
) -> Result<roxmltree::Document<'a>> {
    roxmltree::Document::parse(text)
        .map_err(|e| Error::conversion(path, converter, format!("invalid XML: {e}")))
}

/// Element children of `node` with local name `name`
pub fn children_named<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

/// Concatenated text of every descendant element with local name `text_tag`
pub fn text_of(node: roxmltree::Node<'_, '_>, text_tag: &str) -> String {
    node.descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == text_tag)
        .filter_map(|n| n.text())
        .collect()
}

/// Cells of a `tbl` element (WordprocessingML `w:` or DrawingML `a:`),
/// one inner vector per row. Cell text is the concatenation of its
/// paragraphs, separated by a space.
pub fn table_grid(table: roxmltree::Node<'_, '_>) -> Vec<Vec<String>> {
    children_named(table, "tr")
        .map(|row| {
            children_named(row, "tc")
                .map(|cell| {
                    let paragraphs: Vec<String> = cell
                        .descendants()
                        .filter(|n| n.is_element() && n.tag_name().name() == "p")
                        .map(|p| text_of(p, "t"))
                        .filter(|t| !t.trim().is_empty())
                        .collect();
                    if paragraphs.is_empty() {
                        text_of(cell, "t")
                    } else {
                        paragraphs.join(" ")
                    }
                })
                .collect()
        })
        .collect()
}

/// Top-level `tbl` elements under `root`, in document order (tables nested
/// in another table's cell are part of that cell, not separate tables).
pub fn top_level_tables<'a, 'input>(
    root: roxmltree::Node<'a, 'input>,
) -> Vec<roxmltree::Node<'a, 'input>> {
    root.descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "tbl")
        .filter(|n| {
            !n.ancestors()
                .skip(1)
                .any(|a| a.is_element() && a.tag_name().name() == "tbl")
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_tables_belong_to_their_cell() -> anyhow::Result<()> {
        let xml = r#"<w:document xmlns:w="urn:w"><w:body>
            <w:tbl><w:tr><w:tc><w:p><w:r><w:t>outer</w:t></w:r></w:p>
              <w:tbl><w:tr><w:tc><w:p><w:r><w:t>inner</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
            </w:tc></w:tr></w:tbl>
            <w:tbl><w:tr><w:tc><w:p><w:r><w:t>second</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
        </w:body></w:document>"#;
        let doc = roxmltree::Document::parse(xml)?;
        let tables = top_level_tables(doc.root_element());
        assert_eq!(tables.len(), 2);
        assert_eq!(table_grid(tables[1]), vec![vec!["second".to_string()]]);
        Ok(())
    }

    #[test]
    fn test_missing_part_is_none() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("p.zip");
        testutil::write_package(&path, &[("a.xml", "<a/>")])?;
        let mut package = Package::open(&path, "test")?;
        assert_eq!(package.read_part("a.xml")?.as_deref(), Some("<a/>"));
        assert!(package.read_part("b.xml")?.is_none());
        assert!(package.require_part("b.xml", "test").is_err());
        Ok(())
    }

    #[test]
    fn test_non_zip_is_conversion_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fake.xlsx");
        std::fs::write(&path, "plain text")?;
        assert!(matches!(
            Package::open(&path, "spreadsheet"),
            Err(Error::ConversionFailure { .. })
        ));
        Ok(())
    }
}
