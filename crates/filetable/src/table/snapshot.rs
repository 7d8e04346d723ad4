// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Immutable table snapshots
//!
//! A snapshot is everything a scan needs: the partitions, the artifacts
//! behind each partition, and the schema they are presented under. A
//! refresh builds a new snapshot; it never edits one in place.

use crate::fingerprint::now_nanos;
use crate::metadata::{ArtifactRef, ConversionRecord};
use crate::partition::{PartitionKey, PartitionValue};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// One partition and the artifacts holding its rows
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionEntry {
    pub partition: PartitionValue,
    pub artifacts: Vec<ArtifactRef>,
}

#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub keys: Vec<PartitionKey>,
    pub partitions: Vec<PartitionEntry>,
    /// Source path to the record its artifacts came from
    pub conversion_records: BTreeMap<PathBuf, ConversionRecord>,
    /// Data columns followed by partition columns
    pub schema: SchemaRef,
    /// The columns read from artifacts
    pub data_schema: SchemaRef,
    pub built_at_nanos: u64,
}

impl TableSnapshot {
    /// The snapshot of a table that has never been refreshed
    #[must_use]
    pub fn empty() -> Self {
        let schema = Arc::new(Schema::empty());
        Self {
            keys: Vec::new(),
            partitions: Vec::new(),
            conversion_records: BTreeMap::new(),
            schema: schema.clone(),
            data_schema: schema,
            built_at_nanos: 0,
        }
    }

    /// Assemble a snapshot. Data columns named like a partition key are
    /// dropped in favour of the partition column.
    #[must_use]
    pub fn build(
        keys: Vec<PartitionKey>,
        partitions: Vec<PartitionEntry>,
        conversion_records: BTreeMap<PathBuf, ConversionRecord>,
        data_schema: &Schema,
    ) -> Self {
        let data_fields: Vec<Field> = data_schema
            .fields()
            .iter()
            .filter(|f| !keys.iter().any(|k| k.name == *f.name()))
            .map(|f| f.as_ref().clone())
            .collect();

        let mut fields = data_fields.clone();
        fields.extend(
            keys.iter()
                .map(|k| Field::new(&k.name, k.inferred_type.data_type(), true)),
        );

        Self {
            keys,
            partitions,
            conversion_records,
            schema: Arc::new(Schema::new(fields)),
            data_schema: Arc::new(Schema::new(data_fields)),
            built_at_nanos: now_nanos(),
        }
    }

    /// Same partitions, artifacts and schema, ignoring when it was built
    #[must_use]
    pub fn same_content(&self, other: &TableSnapshot) -> bool {
        self.keys == other.keys
            && self.partitions == other.partitions
            && self.conversion_records == other.conversion_records
            && self.schema == other.schema
    }

    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn num_artifacts(&self) -> usize {
        self.partitions.iter().map(|p| p.artifacts.len()).sum()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.partitions.iter().flat_map(|p| p.artifacts.iter())
    }
}

/// Union of artifact schemas, by column name in first-seen order.
///
/// Every column is nullable, since an artifact may lack it. Integer and
/// float columns widen to `Float64`; other type conflicts widen to `Utf8`.
#[must_use]
pub fn merge_schemas<'a, I>(schemas: I) -> Schema
where
    I: IntoIterator<Item = &'a SchemaRef>,
{
    let mut fields: Vec<Field> = Vec::new();
    for schema in schemas {
        for field in schema.fields() {
            match fields.iter_mut().find(|f| f.name() == field.name()) {
                Some(existing) if existing.data_type() == field.data_type() => {}
                Some(existing) => {
                    let widened = widen(existing.data_type(), field.data_type());
                    *existing = Field::new(existing.name(), widened, true);
                }
                None => fields.push(field.as_ref().clone().with_nullable(true)),
            }
        }
    }
    Schema::new(fields)
}

fn widen(a: &DataType, b: &DataType) -> DataType {
    if a.is_null() {
        return b.clone();
    }
    if b.is_null() {
        return a.clone();
    }
    let numeric = |t: &DataType| t.is_integer() || t.is_floating();
    if numeric(a) && numeric(b) {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionType;

    fn schema(fields: Vec<(&str, DataType)>) -> SchemaRef {
        Arc::new(Schema::new(
            fields
                .into_iter()
                .map(|(n, t)| Field::new(n, t, false))
                .collect::<Vec<_>>(),
        ))
    }

    #[test]
    fn test_merge_unions_and_widens() {
        let a = schema(vec![("id", DataType::Int64), ("v", DataType::Int64)]);
        let b = schema(vec![("v", DataType::Float64), ("note", DataType::Utf8)]);
        let c = schema(vec![("id", DataType::Boolean)]);

        let merged = merge_schemas([&a, &b, &c]);
        let names: Vec<&str> = merged.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["id", "v", "note"]);
        assert_eq!(merged.field(0).data_type(), &DataType::Utf8);
        assert_eq!(merged.field(1).data_type(), &DataType::Float64);
        assert!(merged.fields().iter().all(|f| f.is_nullable()));
    }

    #[test]
    fn test_partition_columns_follow_data_columns() {
        let keys = vec![
            PartitionKey {
                name: "year".to_string(),
                inferred_type: PartitionType::Integer,
            },
            PartitionKey {
                name: "region".to_string(),
                inferred_type: PartitionType::Text,
            },
        ];
        let data = Schema::new(vec![
            Field::new("reading", DataType::Float64, true),
            Field::new("year", DataType::Utf8, true),
        ]);
        let snapshot = TableSnapshot::build(keys, Vec::new(), BTreeMap::new(), &data);

        let names: Vec<&str> = snapshot.schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["reading", "year", "region"]);
        assert_eq!(snapshot.schema.field(1).data_type(), &DataType::Int64);
        assert_eq!(snapshot.data_schema.fields().len(), 1);
    }

    #[test]
    fn test_same_content_ignores_build_time() {
        let data = Schema::new(vec![Field::new("x", DataType::Int64, true)]);
        let a = TableSnapshot::build(Vec::new(), Vec::new(), BTreeMap::new(), &data);
        let mut b = a.clone();
        b.built_at_nanos += 1;
        assert!(a.same_content(&b));
        assert!(!a.same_content(&TableSnapshot::empty()));
    }
}
