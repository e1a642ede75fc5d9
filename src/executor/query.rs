use std::time::{Duration, Instant};

use crate::error::{DbError, DbResult};
use crate::executor::PhysicalOperator;
use crate::storage::tuple::{Row, TableColumn};

/// The plan root: projects the child's output down to the statement's
/// target columns and keeps execution statistics (wall time between open
/// and close, rows actually produced).
pub struct PhysicalQuery {
    child: Box<dyn PhysicalOperator + Send>,
    target_columns: Vec<TableColumn>,
    projection: Vec<usize>,
    open_time: Option<Instant>,
    elapsed: Option<Duration>,
    actual_rows: usize,
}

impl PhysicalQuery {
    pub fn new(
        target_columns: Vec<TableColumn>,
        child: Box<dyn PhysicalOperator + Send>,
    ) -> Self {
        Self {
            child,
            target_columns,
            projection: Vec::new(),
            open_time: None,
            elapsed: None,
            actual_rows: 0,
        }
    }

    /// Wall time between open and close.
    pub fn elapsed_time(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn actual_rows(&self) -> usize {
        self.actual_rows
    }
}

impl PhysicalOperator for PhysicalQuery {
    fn name(&self) -> &str {
        "Result"
    }

    fn columns(&self) -> &[TableColumn] {
        &self.target_columns
    }

    fn open(&mut self) -> DbResult<()> {
        // monotonic, immune to wall-clock adjustments
        self.open_time = Some(Instant::now());
        self.child.open()?;

        let child_columns = self.child.columns();
        self.projection = self
            .target_columns
            .iter()
            .map(|target| {
                child_columns
                    .iter()
                    .position(|c| c == target)
                    .ok_or_else(|| {
                        DbError::ExecutorCheck(format!("cannot project unknown column {}", target))
                    })
            })
            .collect::<DbResult<_>>()?;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        match self.child.next()? {
            None => Ok(None),
            Some(row) => {
                self.actual_rows += 1;
                Ok(Some(
                    self.projection.iter().map(|i| row[*i].clone()).collect(),
                ))
            }
        }
    }

    fn close(&mut self) -> DbResult<()> {
        let closed = self.child.close();
        if let Some(open_time) = self.open_time {
            self.elapsed = Some(open_time.elapsed());
        }
        closed
    }
}
