// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! DataFusion table provider over a refreshable table
//!
//! Filters that only involve partition columns are translated into a
//! [`PartitionPredicate`] and used to prune partitions. Pruning is
//! conservative, so those filters are reported `Inexact` and DataFusion
//! still applies them to the rows.

use crate::partition::{PartitionLiteral, PartitionPredicate};
use crate::table::{PartitionedTable, RefreshableTable, TableSnapshot};
use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use datafusion::catalog::Session;
use datafusion::common::ScalarValue;
use datafusion::datasource::{TableProvider, TableType};
use datafusion::error::{DataFusionError, Result as DataFusionResult};
use datafusion::execution::TaskContext;
use datafusion::logical_expr::expr::InList;
use datafusion::logical_expr::{Between, BinaryExpr, Expr, Operator, TableProviderFilterPushDown};
use datafusion::physical_expr::EquivalenceProperties;
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::stream::RecordBatchStreamAdapter;
use datafusion::physical_plan::{
    DisplayAs, DisplayFormatType, ExecutionPlan, Partitioning, PlanProperties,
    SendableRecordBatchStream,
};
use futures::StreamExt;
use std::any::Any;
use std::sync::Arc;

#[derive(Debug)]
pub struct FileTableProvider {
    table: RefreshableTable,
    /// Snapshot whose schema this provider reports
    snapshot: Arc<TableSnapshot>,
}

impl FileTableProvider {
    #[must_use]
    pub fn new(table: RefreshableTable, snapshot: Arc<TableSnapshot>) -> Self {
        Self { table, snapshot }
    }

    /// A provider over the table's current snapshot
    #[must_use]
    pub fn current(table: RefreshableTable) -> Self {
        let snapshot = table.current_snapshot();
        Self::new(table, snapshot)
    }

    #[must_use]
    pub fn table(&self) -> &RefreshableTable {
        &self.table
    }

    fn partition_predicate(&self, expr: &Expr) -> Option<PartitionPredicate> {
        let is_key = |name: &str| self.snapshot.keys.iter().any(|k| k.name == name);
        to_predicate(expr, &is_key)
    }
}

#[async_trait]
impl TableProvider for FileTableProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.snapshot.schema.clone()
    }

    fn table_type(&self) -> TableType {
        TableType::Base
    }

    fn supports_filters_pushdown(
        &self,
        filters: &[&Expr],
    ) -> DataFusionResult<Vec<TableProviderFilterPushDown>> {
        Ok(filters
            .iter()
            .map(|filter| match self.partition_predicate(filter) {
                Some(_) => TableProviderFilterPushDown::Inexact,
                None => TableProviderFilterPushDown::Unsupported,
            })
            .collect())
    }

    async fn scan(
        &self,
        _state: &dyn Session,
        projection: Option<&Vec<usize>>,
        filters: &[Expr],
        limit: Option<usize>,
    ) -> DataFusionResult<Arc<dyn ExecutionPlan>> {
        self.table.ensure_fresh().await;

        // A newer snapshot is only usable while the planned schema holds
        let current = self.table.current_snapshot();
        let snapshot = if current.schema == self.snapshot.schema {
            current
        } else {
            let name = self.table.name().to_string();
            diagnostics::debug!("Schema of table {name} changed since planning; scanning the planned snapshot", name: &name);
            self.snapshot.clone()
        };

        let predicate = filters
            .iter()
            .filter_map(|f| self.partition_predicate(f))
            .fold(PartitionPredicate::True, PartitionPredicate::and);

        let exec = FileScanExec::new(
            self.table.name().to_string(),
            self.table.partitioned_at(snapshot),
            predicate,
            projection.cloned(),
            limit,
        )?;
        Ok(Arc::new(exec))
    }
}

/// Streams the pruned partitions of one snapshot
#[derive(Debug)]
pub struct FileScanExec {
    table_name: String,
    table: PartitionedTable,
    predicate: PartitionPredicate,
    projection: Option<Vec<usize>>,
    limit: Option<usize>,
    schema: SchemaRef,
    properties: PlanProperties,
}

impl FileScanExec {
    pub fn new(
        table_name: String,
        table: PartitionedTable,
        predicate: PartitionPredicate,
        projection: Option<Vec<usize>>,
        limit: Option<usize>,
    ) -> DataFusionResult<Self> {
        let full = table.schema();
        let schema = match &projection {
            Some(indices) => Arc::new(full.project(indices)?),
            None => full,
        };
        let properties = PlanProperties::new(
            EquivalenceProperties::new(schema.clone()),
            Partitioning::UnknownPartitioning(1),
            EmissionType::Incremental,
            Boundedness::Bounded,
        );
        Ok(Self {
            table_name,
            table,
            predicate,
            projection,
            limit,
            schema,
            properties,
        })
    }

    #[must_use]
    pub fn predicate(&self) -> &PartitionPredicate {
        &self.predicate
    }

    /// Number of partitions this scan will read
    #[must_use]
    pub fn partitions_scanned(&self) -> usize {
        self.table.pruned_partitions(&self.predicate).len()
    }
}

impl DisplayAs for FileScanExec {
    fn fmt_as(&self, t: DisplayFormatType, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match t {
            DisplayFormatType::Default | DisplayFormatType::Verbose => {
                write!(
                    f,
                    "FileScanExec: table={}, partitions={}/{}",
                    self.table_name,
                    self.partitions_scanned(),
                    self.table.snapshot().num_partitions()
                )
            }
            DisplayFormatType::TreeRender => write!(f, "FileScanExec"),
        }
    }
}

impl ExecutionPlan for FileScanExec {
    fn name(&self) -> &str {
        "FileScanExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn properties(&self) -> &PlanProperties {
        &self.properties
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![]
    }

    fn with_new_children(
        self: Arc<Self>,
        _children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> DataFusionResult<Arc<dyn ExecutionPlan>> {
        Ok(self)
    }

    fn execute(
        &self,
        partition: usize,
        _context: Arc<TaskContext>,
    ) -> DataFusionResult<SendableRecordBatchStream> {
        if partition != 0 {
            return Err(DataFusionError::Internal(format!(
                "FileScanExec has one partition, asked for {partition}"
            )));
        }
        let stream = self
            .table
            .scan_with(&self.predicate, self.projection.clone(), self.limit)
            .map(|batch| batch.map_err(DataFusionError::from));
        Ok(Box::pin(RecordBatchStreamAdapter::new(self.schema.clone(), stream)))
    }
}

/// Translate `expr` into a partition predicate when every column it
/// mentions satisfies `is_key`.
fn to_predicate(expr: &Expr, is_key: &dyn Fn(&str) -> bool) -> Option<PartitionPredicate> {
    match expr {
        Expr::BinaryExpr(BinaryExpr { left, op, right }) => match op {
            Operator::And => Some(to_predicate(left, is_key)?.and(to_predicate(right, is_key)?)),
            Operator::Or => Some(to_predicate(left, is_key)?.or(to_predicate(right, is_key)?)),
            _ => comparison(left, *op, right, is_key),
        },
        Expr::Not(inner) => Some(to_predicate(inner, is_key)?.not()),
        Expr::IsNull(inner) => Some(PartitionPredicate::IsNull(key_column(inner, is_key)?)),
        Expr::IsNotNull(inner) => {
            Some(PartitionPredicate::IsNull(key_column(inner, is_key)?).not())
        }
        Expr::InList(InList {
            expr,
            list,
            negated,
        }) => {
            let key = key_column(expr, is_key)?;
            let values = list.iter().map(literal).collect::<Option<Vec<_>>>()?;
            let predicate = PartitionPredicate::In(key, values);
            Some(if *negated { predicate.not() } else { predicate })
        }
        Expr::Between(Between {
            expr,
            negated,
            low,
            high,
        }) => {
            let key = key_column(expr, is_key)?;
            let predicate = PartitionPredicate::GtEq(key.clone(), literal(low)?)
                .and(PartitionPredicate::LtEq(key, literal(high)?));
            Some(if *negated { predicate.not() } else { predicate })
        }
        _ => None,
    }
}

fn comparison(
    left: &Expr,
    op: Operator,
    right: &Expr,
    is_key: &dyn Fn(&str) -> bool,
) -> Option<PartitionPredicate> {
    // Normalize to `column op literal`
    let (key, op, value) = match (key_column(left, is_key), key_column(right, is_key)) {
        (Some(key), None) => (key, op, literal(right)?),
        (None, Some(key)) => (key, op.swap()?, literal(left)?),
        _ => return None,
    };
    Some(match op {
        Operator::Eq => PartitionPredicate::Eq(key, value),
        Operator::NotEq => PartitionPredicate::NotEq(key, value),
        Operator::Lt => PartitionPredicate::Lt(key, value),
        Operator::LtEq => PartitionPredicate::LtEq(key, value),
        Operator::Gt => PartitionPredicate::Gt(key, value),
        Operator::GtEq => PartitionPredicate::GtEq(key, value),
        _ => return None,
    })
}

fn key_column(expr: &Expr, is_key: &dyn Fn(&str) -> bool) -> Option<String> {
    match expr {
        Expr::Column(column) if is_key(&column.name) => Some(column.name.clone()),
        _ => None,
    }
}

/// Non-null scalar literal as a partition literal
fn literal(expr: &Expr) -> Option<PartitionLiteral> {
    let Expr::Literal(value) = expr else {
        return None;
    };
    match value {
        ScalarValue::Int8(Some(v)) => Some(PartitionLiteral::Integer(i64::from(*v))),
        ScalarValue::Int16(Some(v)) => Some(PartitionLiteral::Integer(i64::from(*v))),
        ScalarValue::Int32(Some(v)) => Some(PartitionLiteral::Integer(i64::from(*v))),
        ScalarValue::Int64(Some(v)) => Some(PartitionLiteral::Integer(*v)),
        ScalarValue::UInt8(Some(v)) => Some(PartitionLiteral::Integer(i64::from(*v))),
        ScalarValue::UInt16(Some(v)) => Some(PartitionLiteral::Integer(i64::from(*v))),
        ScalarValue::UInt32(Some(v)) => Some(PartitionLiteral::Integer(i64::from(*v))),
        ScalarValue::UInt64(Some(v)) => i64::try_from(*v).ok().map(PartitionLiteral::Integer),
        ScalarValue::Float32(Some(v)) => Some(PartitionLiteral::Decimal(f64::from(*v))),
        ScalarValue::Float64(Some(v)) => Some(PartitionLiteral::Decimal(*v)),
        ScalarValue::Boolean(Some(v)) => Some(PartitionLiteral::Boolean(*v)),
        ScalarValue::Utf8(Some(v)) | ScalarValue::LargeUtf8(Some(v)) | ScalarValue::Utf8View(Some(v)) => {
            Some(PartitionLiteral::Text(v.clone()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::prelude::{col, lit};

    fn keys(name: &str) -> bool {
        name == "year" || name == "site"
    }

    #[test]
    fn test_partition_filters_translate() {
        let expr = col("year").gt_eq(lit(2024i64)).and(col("site").eq(lit("north")));
        let predicate = to_predicate(&expr, &keys).expect("translatable");
        assert_eq!(
            predicate,
            PartitionPredicate::GtEq("year".to_string(), PartitionLiteral::Integer(2024))
                .and(PartitionPredicate::Eq("site".to_string(), PartitionLiteral::Text("north".to_string())))
        );
    }

    #[test]
    fn test_literal_on_the_left_is_flipped() {
        let expr = lit(2024i64).lt(col("year"));
        assert_eq!(
            to_predicate(&expr, &keys),
            Some(PartitionPredicate::Gt("year".to_string(), PartitionLiteral::Integer(2024)))
        );
    }

    #[test]
    fn test_data_columns_are_not_translated() {
        assert!(to_predicate(&col("reading").gt(lit(1.5)), &keys).is_none());
        let mixed = col("year").eq(lit(2024i64)).or(col("reading").gt(lit(1.5)));
        assert!(to_predicate(&mixed, &keys).is_none());
    }

    #[test]
    fn test_in_list_and_null_checks() {
        let expr = col("year").in_list(vec![lit(2023i64), lit(2024i64)], true);
        assert_eq!(
            to_predicate(&expr, &keys),
            Some(
                PartitionPredicate::In(
                    "year".to_string(),
                    vec![PartitionLiteral::Integer(2023), PartitionLiteral::Integer(2024)]
                )
                .not()
            )
        );
        assert_eq!(
            to_predicate(&col("site").is_not_null(), &keys),
            Some(PartitionPredicate::IsNull("site".to_string()).not())
        );
    }
}
