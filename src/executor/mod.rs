pub mod agg;
pub mod command;
pub mod ddl;
pub mod dml;
pub mod filter;
pub mod join;
pub mod query;
pub mod scan;
pub mod sort;

use std::collections::HashMap;
use std::sync::Arc;

use log::error;

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::planner::{plan_query, Condition, Operand};
use crate::storage::tuple::{Row, TableColumn, Value};
use crate::storage::Location;

/// The pull iterator contract every physical operator implements:
/// `open` acquires resources (including locks), `next` lazily yields rows
/// until exhausted, `close` releases everything. `close` must be safe to
/// call after a failed `open` or mid-stream error.
pub trait PhysicalOperator {
    fn name(&self) -> &str;

    /// Fully qualified output schema; empty for operators whose row count
    /// is the only result (DML, DDL, CHECKPOINT).
    fn columns(&self) -> &[TableColumn];

    fn open(&mut self) -> DbResult<()>;

    fn next(&mut self) -> DbResult<Option<Row>>;

    fn close(&mut self) -> DbResult<()>;

    /// Scans that can hand out tuple locations for DML override this.
    fn next_location(&mut self) -> DbResult<Option<Location>> {
        Err(DbError::ExecutorCheck(format!(
            "{} cannot produce locations",
            self.name()
        )))
    }
}

/// Binds a row to its schema so conditions can look values up by
/// qualified column.
pub(crate) fn bind_row(columns: &[TableColumn], row: &Row) -> HashMap<TableColumn, Value> {
    columns.iter().cloned().zip(row.iter().cloned()).collect()
}

fn resolve_operand<'a>(
    values: &'a HashMap<TableColumn, Value>,
    operand: &'a Operand,
) -> DbResult<&'a Value> {
    match operand {
        Operand::Const(value) => Ok(value),
        Operand::Column(column) => values.get(column).ok_or_else(|| {
            DbError::ExecutorCheck(format!("unknown column {} in condition", column))
        }),
    }
}

pub(crate) fn is_condition_true(
    values: &HashMap<TableColumn, Value>,
    condition: &Condition,
) -> DbResult<bool> {
    let left = resolve_operand(values, &condition.left)?;
    let right = resolve_operand(values, &condition.right)?;
    match condition.sign {
        crate::planner::CompareOp::Eq => Ok(left == right),
        crate::planner::CompareOp::NotEq => Ok(left != right),
        crate::planner::CompareOp::Lt => Ok(left.try_cmp(right)? == std::cmp::Ordering::Less),
        crate::planner::CompareOp::Gt => Ok(left.try_cmp(right)? == std::cmp::Ordering::Greater),
    }
}

/// Drains a child operator into a buffer; sorting, aggregation and joins
/// work over materialized input.
pub(crate) fn materialize(child: &mut dyn PhysicalOperator) -> DbResult<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = child.next()? {
        rows.push(row);
    }
    Ok(rows)
}

/// What a statement hands back to the client: projected rows plus their
/// schema, or row count only (DML) when there is no schema.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub target_columns: Option<Vec<TableColumn>>,
    pub rows: Vec<Row>,
}

impl std::fmt::Display for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(columns) = &self.target_columns {
            let header: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
            writeln!(f, "{}", header.join(" | "))?;
            for row in &self.rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                writeln!(f, "{}", cells.join(" | "))?;
            }
        }
        write!(f, "(Rows {})", self.rows.len())
    }
}

/// Runs one operator tree to completion: open, drain, close. The
/// operator is closed even when execution fails so locks and temp files
/// never outlive the statement.
pub fn exec_plan(op: &mut dyn PhysicalOperator) -> DbResult<QueryResult> {
    if let Err(e) = op.open() {
        let _ = op.close();
        return Err(e);
    }
    let drained: DbResult<Vec<Row>> = (|| {
        let mut rows = Vec::new();
        while let Some(row) = op.next()? {
            rows.push(row);
        }
        Ok(rows)
    })();
    let closed = op.close();
    let rows = drained?;
    closed?;

    let target_columns = if op.columns().is_empty() {
        None
    } else {
        Some(op.columns().to_vec())
    };
    Ok(QueryResult {
        target_columns,
        rows,
    })
}

/// The statement driver: parse, plan, and run the plan inside its own
/// transaction (commands like CHECKPOINT run outside one). Rollback
/// errors abort the transaction before propagating; notice errors leave
/// the (side-effect free) transaction to commit.
pub fn exec_query(db: &Arc<Database>, sql: &str) -> DbResult<QueryResult> {
    let mut plan = plan_query(db, sql)?;
    if plan.is_command {
        return exec_plan(plan.root.as_mut());
    }

    let xid = db.start_transaction()?;
    match exec_plan(plan.root.as_mut()) {
        Ok(result) => {
            db.commit_transaction(xid)?;
            Ok(result)
        }
        Err(e) => {
            if e.is_rollback() {
                error!("aborting transaction {}: {}", xid, e);
                db.abort_transaction(xid)?;
            } else {
                db.commit_transaction(xid)?;
            }
            Err(e)
        }
    }
}
