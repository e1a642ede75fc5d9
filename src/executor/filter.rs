use crate::error::DbResult;
use crate::executor::{bind_row, is_condition_true, PhysicalOperator};
use crate::planner::Condition;
use crate::storage::tuple::{Row, TableColumn};

/// Applies a residual predicate to its child's output. Scans evaluate
/// their own conditions; this operator exists for predicates that only
/// make sense after a join has produced its (possibly null-padded) rows.
pub struct Filter {
    condition: Condition,
    child: Box<dyn PhysicalOperator + Send>,
    columns: Vec<TableColumn>,
}

impl Filter {
    pub fn new(condition: Condition, child: Box<dyn PhysicalOperator + Send>) -> Self {
        Self {
            condition,
            child,
            columns: Vec::new(),
        }
    }
}

impl PhysicalOperator for Filter {
    fn name(&self) -> &str {
        "Filter"
    }

    fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.columns = self.child.columns().to_vec();
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        while let Some(row) = self.child.next()? {
            let values = bind_row(&self.columns, &row);
            if is_condition_true(&values, &self.condition)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()
    }
}
