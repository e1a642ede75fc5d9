use std::sync::Arc;

use log::info;

use crate::catalog::{ColumnType, IndexForm, TableForm};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::executor::PhysicalOperator;
use crate::storage::tuple::{Row, TableColumn};

#[derive(Debug, Clone)]
pub enum DdlStatement {
    CreateTable {
        table_name: String,
        columns: Vec<(String, ColumnType)>,
    },
    CreateIndex {
        index_name: String,
        table_name: String,
        columns: Vec<String>,
    },
}

/// CREATE TABLE / CREATE INDEX. The catalog mutation happens in `open`;
/// a failed index build takes its catalog entry back out before
/// propagating, so DDL never leaves a half-registered index behind.
pub struct PhysicalDdl {
    db: Arc<Database>,
    statement: DdlStatement,
    done: bool,
}

impl PhysicalDdl {
    pub fn new(db: Arc<Database>, statement: DdlStatement) -> Self {
        Self {
            db,
            statement,
            done: false,
        }
    }

    fn create_table(&self, table_name: &str, columns: &[(String, ColumnType)]) -> DbResult<()> {
        let (names, types): (Vec<String>, Vec<ColumnType>) = columns.iter().cloned().unzip();
        self.db
            .mut_catalog()
            .insert_table(TableForm::new(table_name, names, types))?;
        info!("created table {}", table_name);
        Ok(())
    }

    fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        columns: &[String],
    ) -> DbResult<()> {
        {
            let catalog = self.db.catalog();
            if !catalog.table_exists(table_name) {
                return Err(DbError::ExecutorCheck(format!(
                    "not found the table {}",
                    table_name
                )));
            }
            let form = catalog.table(table_name)?;
            for column in columns {
                if form.column_index(column).is_none() {
                    return Err(DbError::ExecutorCheck(format!(
                        "not found the column {} in table {}",
                        column, table_name
                    )));
                }
            }
        }

        self.db.mut_catalog().insert_index(IndexForm::new(
            index_name,
            columns.to_vec(),
            table_name,
        ))?;
        if let Err(e) = self
            .db
            .index_tuple_create(index_name, table_name, columns)
        {
            // undo the catalog insertion before reporting the failure
            self.db.mut_catalog().delete_index(index_name)?;
            self.db.index_store().forget(index_name);
            return Err(DbError::Storage(format!(
                "cannot build index {}: {}",
                index_name, e
            )));
        }
        info!("created index {} on {}", index_name, table_name);
        Ok(())
    }
}

impl PhysicalOperator for PhysicalDdl {
    fn name(&self) -> &str {
        "DDL"
    }

    fn columns(&self) -> &[TableColumn] {
        &[]
    }

    fn open(&mut self) -> DbResult<()> {
        match &self.statement {
            DdlStatement::CreateTable {
                table_name,
                columns,
            } => self.create_table(table_name, columns),
            DdlStatement::CreateIndex {
                index_name,
                table_name,
                columns,
            } => self.create_index(index_name, table_name, columns),
        }
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(Some(Vec::new()))
    }

    fn close(&mut self) -> DbResult<()> {
        Ok(())
    }
}
