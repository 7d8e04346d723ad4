// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Delimited text (CSV, TSV, PSV) via arrow-csv

use super::{ConvertOptions, DecodedTable};
use crate::Result;
use arrow_csv::reader::Format;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Converts delimited text; the delimiter follows the extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedConverter;

impl DelimitedConverter {
    pub const EXTENSIONS: &'static [&'static str] = &["csv", "tsv", "psv"];

    #[must_use]
    pub fn delimiter_for(path: &Path) -> u8 {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("tsv") => b'\t',
            Some("psv") => b'|',
            _ => b',',
        }
    }

    pub fn decode(&self, path: &Path, options: &ConvertOptions) -> Result<Vec<DecodedTable>> {
        let delimiter = Self::delimiter_for(path);
        let format = Format::default()
            .with_delimiter(delimiter)
            .with_header(true);

        let mut file = File::open(path)?;
        let (schema, _) =
            format.infer_schema(BufReader::new(&file), Some(options.schema_infer_max_records))?;
        let schema = Arc::new(schema);
        _ = file.seek(SeekFrom::Start(0))?;

        let reader = arrow_csv::ReaderBuilder::new(schema.clone())
            .with_format(format)
            .with_batch_size(options.batch_size)
            .build(BufReader::new(file))?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(vec![DecodedTable {
            name: None,
            schema,
            batches,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;
    use tempfile::tempdir;

    #[test]
    fn test_csv_schema_is_inferred() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sales.csv");
        std::fs::write(&path, "region,amount,ok\neast,10,true\nwest,2.5,false\n")?;

        let tables = DelimitedConverter.decode(&path, &ConvertOptions::default())?;
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(table.schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(table.schema.field(2).data_type(), &DataType::Boolean);
        let rows: usize = table.batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
        Ok(())
    }

    #[test]
    fn test_tsv_uses_tab_delimiter() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.tsv");
        std::fs::write(&path, "a\tb\n1\t2\n")?;
        let tables = DelimitedConverter.decode(&path, &ConvertOptions::default())?;
        assert_eq!(tables[0].schema.fields().len(), 2);
        assert_eq!(DelimitedConverter::delimiter_for(Path::new("x.psv")), b'|');
        Ok(())
    }
}
