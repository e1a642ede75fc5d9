use std::sync::Arc;

use indexmap::IndexMap;

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::executor::{materialize, PhysicalOperator};
use crate::storage::tuple::{Row, TableColumn, Value};

/// GROUP BY with a single aggregate: materialize the child, bucket rows
/// by the group column, then fold each bucket through the named catalog
/// aggregate. Output schema is `(group_by, agg_column)`; groups come out
/// in first-seen order.
pub struct HashAgg {
    db: Arc<Database>,
    group_by_column: TableColumn,
    aggregate_function_name: String,
    aggregate_column: TableColumn,
    child: Box<dyn PhysicalOperator + Send>,
    columns: Vec<TableColumn>,
    group_by_index: usize,
    aggregate_index: usize,
    output: Option<std::vec::IntoIter<Row>>,
}

impl HashAgg {
    pub fn new(
        db: Arc<Database>,
        group_by_column: TableColumn,
        aggregate_function_name: &str,
        aggregate_column: TableColumn,
        child: Box<dyn PhysicalOperator + Send>,
    ) -> Self {
        Self {
            db,
            group_by_column,
            aggregate_function_name: aggregate_function_name.to_string(),
            aggregate_column,
            child,
            columns: Vec::new(),
            group_by_index: 0,
            aggregate_index: 0,
            output: None,
        }
    }

    fn column_index(child_columns: &[TableColumn], column: &TableColumn) -> DbResult<usize> {
        child_columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| DbError::ExecutorCheck(format!("unknown column {}", column)))
    }
}

impl PhysicalOperator for HashAgg {
    fn name(&self) -> &str {
        "HashAgg"
    }

    fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        let child_columns = self.child.columns();
        self.group_by_index = Self::column_index(child_columns, &self.group_by_column)?;
        self.aggregate_index = Self::column_index(child_columns, &self.aggregate_column)?;
        self.columns = vec![self.group_by_column.clone(), self.aggregate_column.clone()];
        // fail before any work if the function does not exist
        self.db
            .catalog()
            .aggregate_function(&self.aggregate_function_name)?;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.output.is_none() {
            let rows = materialize(self.child.as_mut())?;

            let mut groups: IndexMap<Value, Vec<Value>> = IndexMap::new();
            for row in rows {
                let key = row[self.group_by_index].clone();
                let value = row[self.aggregate_index].clone();
                groups.entry(key).or_default().push(value);
            }

            let callback = self
                .db
                .catalog()
                .aggregate_function(&self.aggregate_function_name)?
                .callback;
            let mut result = Vec::with_capacity(groups.len());
            for (key, values) in groups {
                let aggregated = callback(&values)?;
                result.push(vec![key, aggregated]);
            }
            self.output = Some(result.into_iter());
        }
        Ok(self.output.as_mut().unwrap().next())
    }

    fn close(&mut self) -> DbResult<()> {
        self.output = None;
        self.child.close()
    }
}
