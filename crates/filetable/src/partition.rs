// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hive-style partition discovery and partition pruning
//!
//! A directory tree like `year=2024/month=01/data.csv` yields the keys
//! `year` and `month` and one partition per `key=value` directory chain.
//! Every partition under one root must carry the same keys in the same
//! order at the same depth; anything else is an ambiguous layout.

use crate::{Error, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use percent_encoding::percent_decode_str;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Marker Hive writes for a null partition value
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionType {
    Integer,
    Decimal,
    Boolean,
    Text,
}

impl PartitionType {
    #[must_use]
    pub fn data_type(self) -> DataType {
        match self {
            PartitionType::Integer => DataType::Int64,
            PartitionType::Decimal => DataType::Float64,
            PartitionType::Boolean => DataType::Boolean,
            PartitionType::Text => DataType::Utf8,
        }
    }

    /// The first of integer, decimal, boolean, text that parses every value
    fn infer<'a>(values: impl Iterator<Item = &'a str>) -> Self {
        let values: Vec<&str> = values.filter(|v| !is_null_value(v)).collect();
        if values.is_empty() {
            PartitionType::Text
        } else if values.iter().all(|v| v.parse::<i64>().is_ok()) {
            PartitionType::Integer
        } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
            PartitionType::Decimal
        } else if values.iter().all(|v| parse_bool(v).is_some()) {
            PartitionType::Boolean
        } else {
            PartitionType::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionLiteral {
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Text(String),
    Null,
}

impl PartitionLiteral {
    fn parse(raw: &str, ty: PartitionType) -> Self {
        if is_null_value(raw) {
            return PartitionLiteral::Null;
        }
        let parsed = match ty {
            PartitionType::Integer => raw.parse().ok().map(PartitionLiteral::Integer),
            PartitionType::Decimal => raw.parse().ok().map(PartitionLiteral::Decimal),
            PartitionType::Boolean => parse_bool(raw).map(PartitionLiteral::Boolean),
            PartitionType::Text => None,
        };
        parsed.unwrap_or_else(|| PartitionLiteral::Text(raw.to_string()))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, PartitionLiteral::Null)
    }

    /// A column of `len` copies of this literal, typed as `ty`
    #[must_use]
    pub fn to_array(&self, ty: PartitionType, len: usize) -> ArrayRef {
        match ty {
            PartitionType::Integer => {
                let v = match self {
                    PartitionLiteral::Integer(i) => Some(*i),
                    _ => None,
                };
                Arc::new(Int64Array::from(vec![v; len]))
            }
            PartitionType::Decimal => {
                let v = match self {
                    PartitionLiteral::Decimal(d) => Some(*d),
                    PartitionLiteral::Integer(i) => Some(*i as f64),
                    _ => None,
                };
                Arc::new(Float64Array::from(vec![v; len]))
            }
            PartitionType::Boolean => {
                let v = match self {
                    PartitionLiteral::Boolean(b) => Some(*b),
                    _ => None,
                };
                Arc::new(BooleanArray::from(vec![v; len]))
            }
            PartitionType::Text => {
                let v = match self {
                    PartitionLiteral::Null => None,
                    other => Some(other.to_string()),
                };
                Arc::new(StringArray::from(vec![v; len]))
            }
        }
    }

    fn compare(&self, other: &PartitionLiteral) -> Option<Ordering> {
        use PartitionLiteral::*;
        match (self, other) {
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Integer(a), Decimal(b)) => (*a as f64).partial_cmp(b),
            (Decimal(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Decimal(a), Decimal(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for PartitionLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionLiteral::Integer(i) => write!(f, "{i}"),
            PartitionLiteral::Decimal(d) => write!(f, "{d}"),
            PartitionLiteral::Boolean(b) => write!(f, "{b}"),
            PartitionLiteral::Text(s) => write!(f, "{s}"),
            PartitionLiteral::Null => write!(f, "NULL"),
        }
    }
}

fn is_null_value(raw: &str) -> bool {
    raw.is_empty() || raw == HIVE_DEFAULT_PARTITION
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKey {
    pub name: String,
    pub inferred_type: PartitionType,
}

/// One partition: its key values, its directory and the files under it
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionValue {
    /// `(key, value)` in key order
    pub values: Vec<(String, PartitionLiteral)>,
    /// Directory relative to the layout root; empty when unpartitioned
    pub relative_dir: PathBuf,
    /// Absolute paths of the data files, sorted
    pub files: Vec<PathBuf>,
}

impl PartitionValue {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PartitionLiteral> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl fmt::Display for PartitionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "(unpartitioned)");
        }
        let parts: Vec<String> = self.values.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join("/"))
    }
}

/// Output of one detection pass
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionLayout {
    pub root: PathBuf,
    pub keys: Vec<PartitionKey>,
    /// Ordered by directory
    pub partitions: Vec<PartitionValue>,
}

impl PartitionLayout {
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.partitions.iter().flat_map(|p| p.files.iter())
    }
}

/// Entry of a synthetic listing, relative to the layout root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingEntry {
    File(PathBuf),
    Dir(PathBuf),
}

type FileFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct PartitionDetector {
    max_depth: usize,
    skip_dirs: Vec<PathBuf>,
    file_filter: Option<FileFilter>,
}

impl fmt::Debug for PartitionDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionDetector")
            .field("max_depth", &self.max_depth)
            .field("skip_dirs", &self.skip_dirs)
            .finish()
    }
}

/// Directory segment as `(key, raw value)`, if it has the `key=value` form
fn parse_segment(segment: &str) -> Option<(String, String)> {
    let (key, value) = segment.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((unescape(key), unescape(value)))
}

/// Undo Hive's `%XX` path escaping
fn unescape(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

type KeyChain = Vec<(String, String)>;

impl PartitionDetector {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            skip_dirs: Vec::new(),
            file_filter: None,
        }
    }

    /// Never descend into `dir` (e.g. the artifact directory)
    #[must_use]
    pub fn with_skip_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.skip_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    /// Only files accepted by `filter` are data files
    #[must_use]
    pub fn with_file_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.file_filter = Some(Arc::new(filter));
        self
    }

    /// Walk `root` and detect its layout.
    pub fn detect(&self, root: &Path) -> Result<PartitionLayout> {
        let mut entries = Vec::new();
        let walker = walkdir::WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !is_hidden(&e.file_name().to_string_lossy())
                    && !self.skip_dirs.iter().any(|d| e.path().starts_with(d))
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                Error::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                )
            })?;
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_path_buf();
            if entry.file_type().is_dir() {
                entries.push(ListingEntry::Dir(relative));
            } else if entry.file_type().is_file() {
                entries.push(ListingEntry::File(relative));
            }
        }
        self.detect_listing(root, &entries)
    }

    /// Leading `key=value` segments of `dir`, up to `max_depth`
    fn key_chain(&self, root: &Path, dir: &Path) -> Result<(KeyChain, bool)> {
        let mut chain = KeyChain::new();
        let mut complete = true;
        for component in dir.components() {
            let segment = component.as_os_str().to_string_lossy();
            match parse_segment(&segment) {
                Some(kv) if chain.len() < self.max_depth => {
                    if chain.iter().any(|(k, _)| *k == kv.0) {
                        return Err(Error::ambiguous_layout(
                            root,
                            format!("key '{}' repeats in {}", kv.0, dir.display()),
                        ));
                    }
                    chain.push(kv);
                }
                _ => {
                    complete = false;
                    break;
                }
            }
        }
        Ok((chain, complete))
    }

    /// Detect the layout of a listing of paths relative to `root`.
    pub fn detect_listing(&self, root: &Path, entries: &[ListingEntry]) -> Result<PartitionLayout> {
        let visible = |p: &Path| {
            !p.components()
                .any(|c| is_hidden(&c.as_os_str().to_string_lossy()))
        };

        // Partition chain -> (relative dir, files)
        let mut groups: BTreeMap<PathBuf, (KeyChain, Vec<PathBuf>)> = BTreeMap::new();
        let mut dirs: Vec<(PathBuf, KeyChain)> = Vec::new();

        for entry in entries {
            match entry {
                ListingEntry::File(rel) => {
                    if !visible(rel) {
                        continue;
                    }
                    let absolute = root.join(rel);
                    if let Some(filter) = &self.file_filter
                        && !filter(&absolute)
                    {
                        continue;
                    }
                    let parent = rel.parent().unwrap_or(Path::new(""));
                    let (chain, _) = self.key_chain(root, parent)?;
                    groups
                        .entry(chain_dir(parent, chain.len()))
                        .or_insert_with(|| (chain, Vec::new()))
                        .1
                        .push(absolute);
                }
                ListingEntry::Dir(rel) => {
                    if !visible(rel) {
                        continue;
                    }
                    let (chain, complete) = self.key_chain(root, rel)?;
                    if complete && !chain.is_empty() {
                        dirs.push((rel.clone(), chain));
                    }
                }
            }
        }

        let canonical: Vec<String> = groups
            .values()
            .next()
            .map(|(chain, _)| chain.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default();

        for (dir, (chain, _)) in &groups {
            check_chain(root, dir, chain, &canonical)?;
        }

        // Directories with the full key chain but no data files are empty partitions
        for (dir, chain) in dirs {
            if canonical.is_empty() || groups.contains_key(&dir) {
                continue;
            }
            let is_ancestor = chain.len() < canonical.len()
                && chain.iter().zip(&canonical).all(|((k, _), c)| k == c);
            if is_ancestor {
                continue;
            }
            check_chain(root, &dir, &chain, &canonical)?;
            _ = groups.insert(dir, (chain, Vec::new()));
        }

        if canonical.is_empty() {
            let mut files: Vec<PathBuf> = groups.into_values().flat_map(|(_, f)| f).collect();
            files.sort();
            return Ok(PartitionLayout {
                root: root.to_path_buf(),
                keys: Vec::new(),
                partitions: vec![PartitionValue {
                    values: Vec::new(),
                    relative_dir: PathBuf::new(),
                    files,
                }],
            });
        }

        let keys: Vec<PartitionKey> = canonical
            .iter()
            .enumerate()
            .map(|(idx, name)| PartitionKey {
                name: name.clone(),
                inferred_type: PartitionType::infer(
                    groups.values().map(|(chain, _)| chain[idx].1.as_str()),
                ),
            })
            .collect();

        let partitions = groups
            .into_iter()
            .map(|(dir, (chain, mut files))| {
                files.sort();
                PartitionValue {
                    values: chain
                        .into_iter()
                        .zip(&keys)
                        .map(|((name, raw), key)| {
                            let literal = PartitionLiteral::parse(&raw, key.inferred_type);
                            (name, literal)
                        })
                        .collect(),
                    relative_dir: dir,
                    files,
                }
            })
            .collect();

        Ok(PartitionLayout {
            root: root.to_path_buf(),
            keys,
            partitions,
        })
    }
}

/// The first `depth` components of `dir`
fn chain_dir(dir: &Path, depth: usize) -> PathBuf {
    dir.components().take(depth).collect()
}

fn check_chain(root: &Path, dir: &Path, chain: &KeyChain, canonical: &[String]) -> Result<()> {
    let keys: Vec<&str> = chain.iter().map(|(k, _)| k.as_str()).collect();
    if keys.iter().copied().eq(canonical.iter().map(String::as_str)) {
        return Ok(());
    }
    let reason = if keys.len() != canonical.len() {
        format!(
            "{} has {} partition level(s), expected {} ({})",
            dir.display(),
            keys.len(),
            canonical.len(),
            canonical.join("/")
        )
    } else if keys.iter().copied().collect::<BTreeSet<_>>()
        == canonical.iter().map(String::as_str).collect::<BTreeSet<_>>()
    {
        format!(
            "{} orders keys as {}, expected {}",
            dir.display(),
            keys.join("/"),
            canonical.join("/")
        )
    } else {
        format!(
            "{} has keys {}, expected {}",
            dir.display(),
            keys.join("/"),
            canonical.join("/")
        )
    };
    Err(Error::ambiguous_layout(root, reason))
}

/// A boolean condition over partition values, evaluated without reading rows
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionPredicate {
    True,
    Eq(String, PartitionLiteral),
    NotEq(String, PartitionLiteral),
    Lt(String, PartitionLiteral),
    LtEq(String, PartitionLiteral),
    Gt(String, PartitionLiteral),
    GtEq(String, PartitionLiteral),
    In(String, Vec<PartitionLiteral>),
    IsNull(String),
    And(Box<PartitionPredicate>, Box<PartitionPredicate>),
    Or(Box<PartitionPredicate>, Box<PartitionPredicate>),
    Not(Box<PartitionPredicate>),
}

impl PartitionPredicate {
    #[must_use]
    pub fn eq<S: Into<String>>(key: S, value: PartitionLiteral) -> Self {
        PartitionPredicate::Eq(key.into(), value)
    }

    #[must_use]
    pub fn and(self, other: PartitionPredicate) -> Self {
        match (self, other) {
            (PartitionPredicate::True, p) | (p, PartitionPredicate::True) => p,
            (a, b) => PartitionPredicate::And(Box::new(a), Box::new(b)),
        }
    }

    #[must_use]
    pub fn or(self, other: PartitionPredicate) -> Self {
        PartitionPredicate::Or(Box::new(self), Box::new(other))
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        PartitionPredicate::Not(Box::new(self))
    }

    /// Whether `partition` may hold matching rows. Conditions on keys the
    /// partition does not have keep it.
    #[must_use]
    pub fn evaluate(&self, partition: &PartitionValue) -> bool {
        self.eval(partition).unwrap_or(true)
    }

    /// `None` when the outcome cannot be decided from partition values
    fn eval(&self, partition: &PartitionValue) -> Option<bool> {
        let cmp = |key: &str, literal: &PartitionLiteral, accept: fn(Ordering) -> bool| {
            let value = partition.get(key)?;
            if value.is_null() {
                return Some(false);
            }
            value.compare(literal).map(accept)
        };

        match self {
            PartitionPredicate::True => Some(true),
            PartitionPredicate::Eq(k, v) => cmp(k, v, Ordering::is_eq),
            PartitionPredicate::NotEq(k, v) => cmp(k, v, Ordering::is_ne),
            PartitionPredicate::Lt(k, v) => cmp(k, v, Ordering::is_lt),
            PartitionPredicate::LtEq(k, v) => cmp(k, v, Ordering::is_le),
            PartitionPredicate::Gt(k, v) => cmp(k, v, Ordering::is_gt),
            PartitionPredicate::GtEq(k, v) => cmp(k, v, Ordering::is_ge),
            PartitionPredicate::In(k, list) => {
                let mut outcome = Some(false);
                for v in list {
                    match cmp(k, v, Ordering::is_eq) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => outcome = None,
                    }
                }
                outcome
            }
            PartitionPredicate::IsNull(k) => partition.get(k).map(PartitionLiteral::is_null),
            PartitionPredicate::And(a, b) => match (a.eval(partition), b.eval(partition)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            PartitionPredicate::Or(a, b) => match (a.eval(partition), b.eval(partition)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            PartitionPredicate::Not(inner) => inner.eval(partition).map(|b| !b),
        }
    }
}
