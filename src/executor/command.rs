use std::sync::Arc;

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::executor::PhysicalOperator;
use crate::storage::tuple::{Row, TableColumn, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Checkpoint,
    Show(String),
}

/// Engine commands that run outside a transaction. CHECKPOINT produces
/// no rows; `SHOW variables` reports engine counters.
pub struct CommandOperator {
    db: Arc<Database>,
    command: Command,
    columns: Vec<TableColumn>,
    output: Option<std::vec::IntoIter<Row>>,
}

impl CommandOperator {
    pub fn new(db: Arc<Database>, command: Command) -> Self {
        Self {
            db,
            command,
            columns: Vec::new(),
            output: None,
        }
    }
}

impl PhysicalOperator for CommandOperator {
    fn name(&self) -> &str {
        "Command"
    }

    fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    fn open(&mut self) -> DbResult<()> {
        if let Command::Show(variable) = &self.command {
            if variable != "variables" {
                return Err(DbError::LogicalPlan(format!(
                    "cannot show {}",
                    variable
                )));
            }
            self.columns = vec![TableColumn::bare("name"), TableColumn::bare("value")];
        }
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.output.is_none() {
            let rows = match &self.command {
                Command::Checkpoint => {
                    self.db.checkpoint()?;
                    vec![Vec::new()]
                }
                Command::Show(_) => vec![
                    vec![
                        Value::Text("transaction_count".to_string()),
                        Value::Int(self.db.transaction_count() as i64),
                    ],
                    vec![
                        Value::Text("current_xid".to_string()),
                        Value::Int(self.db.tx_mgr.current_xid() as i64),
                    ],
                    vec![
                        Value::Text("activity_count".to_string()),
                        Value::Int(self.db.tx_mgr.active_count() as i64),
                    ],
                ],
            };
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().unwrap().next())
    }

    fn close(&mut self) -> DbResult<()> {
        self.output = None;
        Ok(())
    }
}
