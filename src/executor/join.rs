use itertools::repeat_n;

use crate::error::{DbError, DbResult};
use crate::executor::{bind_row, is_condition_true, materialize, PhysicalOperator};
use crate::planner::Condition;
use crate::storage::tuple::{Row, TableColumn, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Cross,
    Inner,
    Left,
    Right,
    Full,
}

/// Nested loop join over two scans. Both sides are materialized; output
/// schema is the left columns followed by the right columns, and rows
/// missing a match are padded with nulls. RIGHT is LEFT with the roles
/// swapped and the concatenation kept in left-right order.
pub struct NestedLoopJoin {
    join_type: JoinType,
    left_table_name: String,
    right_table_name: String,
    condition: Option<Condition>,
    left: Box<dyn PhysicalOperator + Send>,
    right: Box<dyn PhysicalOperator + Send>,
    columns: Vec<TableColumn>,
    output: Option<std::vec::IntoIter<Row>>,
}

impl NestedLoopJoin {
    pub fn new(
        join_type: JoinType,
        left_table_name: &str,
        right_table_name: &str,
        condition: Option<Condition>,
        left: Box<dyn PhysicalOperator + Send>,
        right: Box<dyn PhysicalOperator + Send>,
    ) -> Self {
        Self {
            join_type,
            left_table_name: left_table_name.to_string(),
            right_table_name: right_table_name.to_string(),
            condition,
            left,
            right,
            columns: Vec::new(),
            output: None,
        }
    }

    fn concat(left: &Row, right: &Row) -> Row {
        let mut row = left.clone();
        row.extend(right.iter().cloned());
        row
    }

    fn nulls(n: usize) -> Row {
        repeat_n(Value::Null, n).collect()
    }

    fn matches(&self, joined: &Row) -> DbResult<bool> {
        let condition = self.condition.as_ref().ok_or_else(|| {
            DbError::ExecutorCheck(format!("{:?} join requires a condition", self.join_type))
        })?;
        let values = bind_row(&self.columns, joined);
        is_condition_true(&values, condition)
    }

    fn join_rows(&mut self) -> DbResult<Vec<Row>> {
        let left_rows = materialize(self.left.as_mut())?;
        let right_rows = materialize(self.right.as_mut())?;
        let left_width = self.left.columns().len();
        let right_width = self.right.columns().len();

        let mut output = Vec::new();
        match self.join_type {
            JoinType::Cross => {
                for l in &left_rows {
                    for r in &right_rows {
                        output.push(Self::concat(l, r));
                    }
                }
            }
            JoinType::Inner => {
                for l in &left_rows {
                    for r in &right_rows {
                        let joined = Self::concat(l, r);
                        if self.matches(&joined)? {
                            output.push(joined);
                        }
                    }
                }
            }
            JoinType::Left => {
                for l in &left_rows {
                    let mut matched = false;
                    for r in &right_rows {
                        let joined = Self::concat(l, r);
                        if self.matches(&joined)? {
                            matched = true;
                            output.push(joined);
                        }
                    }
                    if !matched {
                        output.push(Self::concat(l, &Self::nulls(right_width)));
                    }
                }
            }
            JoinType::Right => {
                // the dual of LEFT: outer loop over the right side
                for r in &right_rows {
                    let mut matched = false;
                    for l in &left_rows {
                        let joined = Self::concat(l, r);
                        if self.matches(&joined)? {
                            matched = true;
                            output.push(joined);
                        }
                    }
                    if !matched {
                        output.push(Self::concat(&Self::nulls(left_width), r));
                    }
                }
            }
            JoinType::Full => {
                // left join first, then the right rows nothing matched
                for l in &left_rows {
                    let mut matched = false;
                    for r in &right_rows {
                        let joined = Self::concat(l, r);
                        if self.matches(&joined)? {
                            matched = true;
                            output.push(joined);
                        }
                    }
                    if !matched {
                        output.push(Self::concat(l, &Self::nulls(right_width)));
                    }
                }
                for r in &right_rows {
                    let mut matched = false;
                    for l in &left_rows {
                        let joined = Self::concat(l, r);
                        if self.matches(&joined)? {
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        output.push(Self::concat(&Self::nulls(left_width), r));
                    }
                }
            }
        }
        Ok(output)
    }
}

impl PhysicalOperator for NestedLoopJoin {
    fn name(&self) -> &str {
        "NestedLoopJoin"
    }

    fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    fn open(&mut self) -> DbResult<()> {
        self.left.open()?;
        self.right.open()?;

        // the children must actually scan the declared tables
        let origin_ok = |columns: &[TableColumn], table: &str| {
            columns.first().map(|c| c.table_name == table).unwrap_or(false)
        };
        if !origin_ok(self.left.columns(), &self.left_table_name)
            || !origin_ok(self.right.columns(), &self.right_table_name)
        {
            return Err(DbError::ExecutorCheck(
                "join children do not match the joined tables".to_string(),
            ));
        }

        self.columns = self.left.columns().to_vec();
        self.columns.extend(self.right.columns().iter().cloned());
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.output.is_none() {
            let rows = self.join_rows()?;
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().unwrap().next())
    }

    fn close(&mut self) -> DbResult<()> {
        self.output = None;
        self.left.close()?;
        self.right.close()
    }
}
