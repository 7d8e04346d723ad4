// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Markdown pipe tables
//!
//! A table is a header row, a delimiter row (`| --- | :-: |`) and the
//! rows that follow up to the first line without a pipe. Tables inside
//! fenced code blocks are ignored.

use super::rows::grid_to_table;
use super::{ConvertOptions, DecodedTable};
use crate::Result;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownConverter;

impl MarkdownConverter {
    pub const EXTENSIONS: &'static [&'static str] = &["md", "markdown"];

    pub fn decode(&self, path: &Path, options: &ConvertOptions) -> Result<Vec<DecodedTable>> {
        let text = std::fs::read_to_string(path)?;
        let mut tables = Vec::new();
        for (idx, grid) in pipe_tables(&text).into_iter().enumerate() {
            let name = format!("table{}", idx + 1);
            if let Some(table) = grid_to_table(Some(name), grid, options.batch_size)? {
                tables.push(table);
            }
        }
        Ok(tables)
    }
}

fn split_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);

    // `\|` is a literal pipe inside a cell
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                _ = chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_delimiter_row(line: &str) -> bool {
    let cells = split_row(line);
    line.contains('-')
        && cells.iter().all(|c| {
            let c = c.trim();
            !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' '))
        })
}

fn is_table_line(line: &str) -> bool {
    line.contains('|') && !line.trim().is_empty()
}

fn pipe_tables(text: &str) -> Vec<Vec<Vec<String>>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut tables = Vec::new();
    let mut in_fence = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.trim_start().starts_with("```") || line.trim_start().starts_with("~~~") {
            in_fence = !in_fence;
            i += 1;
            continue;
        }
        if in_fence {
            i += 1;
            continue;
        }

        let header_follows = i + 1 < lines.len()
            && is_table_line(line)
            && is_delimiter_row(lines[i + 1]);
        if !header_follows {
            i += 1;
            continue;
        }

        let mut grid = vec![split_row(line)];
        i += 2;
        while i < lines.len() && is_table_line(lines[i]) {
            grid.push(split_row(lines[i]));
            i += 1;
        }
        tables.push(grid);
    }
    tables
}
