use std::sync::Arc;

use log::debug;

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::executor::scan::LocationScan;
use crate::executor::PhysicalOperator;
use crate::planner::{DeleteOperator, InsertOperator, UpdateOperator};
use crate::storage::tuple::{IndexKey, Row, TableColumn, Value};
use crate::storage::Location;
use crate::transaction::lock::{index_lock, table_lock, LockMode};
use crate::transaction::Xid;

fn dml_xid(db: &Database) -> DbResult<Xid> {
    db.session_xid()
        .ok_or_else(|| DbError::ExecutorCheck("no transaction bound to this thread".to_string()))
}

/// An index over the target table, with the positions of its key columns
/// inside a full table row.
struct IndexInfo {
    index_name: String,
    column_ids: Vec<usize>,
}

impl IndexInfo {
    fn key_of(&self, row: &Row) -> IndexKey {
        self.column_ids.iter().map(|i| row[*i].clone()).collect()
    }
}

fn collect_index_infos(
    db: &Database,
    table_name: &str,
    all_columns: &[String],
) -> DbResult<Vec<IndexInfo>> {
    let mut infos = Vec::new();
    for form in db.catalog().indexes_of_table(table_name) {
        let mut column_ids = Vec::new();
        for column in &form.columns {
            let id = all_columns
                .iter()
                .position(|c| c == column)
                .ok_or_else(|| {
                    DbError::ExecutorCheck(format!(
                        "index {} references unknown column {}",
                        form.index_name, column
                    ))
                })?;
            column_ids.push(id);
        }
        infos.push(IndexInfo {
            index_name: form.index_name.clone(),
            column_ids,
        });
    }
    Ok(infos)
}

/// Positions of the statement's columns within the full table row.
fn resolve_column_ids(
    statement_columns: &[TableColumn],
    all_columns: &[String],
) -> DbResult<Vec<usize>> {
    let mut ids = Vec::new();
    for column in statement_columns {
        let id = all_columns
            .iter()
            .position(|c| *c == column.column_name)
            .ok_or_else(|| DbError::ExecutorCheck("error caused by columns".to_string()))?;
        ids.push(id);
    }
    if ids.len() > all_columns.len() {
        return Err(DbError::ExecutorCheck("error caused by columns".to_string()));
    }
    Ok(ids)
}

fn acquire_write_locks(
    db: &Database,
    table_name: &str,
    indexes: &[IndexInfo],
) -> DbResult<()> {
    let xid = dml_xid(db)?;
    db.lock_manager()
        .acquire_lock(&table_lock(table_name), xid, LockMode::Exclusive)?;
    for index in indexes {
        db.lock_manager()
            .acquire_lock(&index_lock(&index.index_name), xid, LockMode::Exclusive)?;
    }
    Ok(())
}

fn release_write_locks(db: &Database, table_name: &str, indexes: &[IndexInfo], locked: bool) {
    if !locked {
        return;
    }
    if let Some(xid) = db.session_xid() {
        db.lock_manager().release_lock(&table_lock(table_name), xid);
        for index in indexes {
            db.lock_manager()
                .release_lock(&index_lock(&index.index_name), xid);
        }
    }
}

/// INSERT: pads each value row out to the full table width, writes it to
/// the heap and mirrors it into every index of the table. One row is
/// processed per `next` call.
pub struct PhysicalInsert {
    db: Arc<Database>,
    logical: InsertOperator,
    column_ids: Vec<usize>,
    table_column_num: usize,
    indexes: Vec<IndexInfo>,
    cursor: usize,
    locked: bool,
}

impl PhysicalInsert {
    pub fn new(db: Arc<Database>, logical: InsertOperator) -> Self {
        Self {
            db,
            logical,
            column_ids: Vec::new(),
            table_column_num: 0,
            indexes: Vec::new(),
            cursor: 0,
            locked: false,
        }
    }

    fn pad_null(&self, values: &Row) -> Row {
        let mut full = vec![Value::Null; self.table_column_num];
        for (id, value) in self.column_ids.iter().zip(values.iter()) {
            full[*id] = value.clone();
        }
        full
    }
}

impl PhysicalOperator for PhysicalInsert {
    fn name(&self) -> &str {
        "Insert"
    }

    fn columns(&self) -> &[TableColumn] {
        &[]
    }

    fn open(&mut self) -> DbResult<()> {
        let all_columns = self
            .db
            .catalog()
            .table(&self.logical.table_name)?
            .columns
            .clone();
        self.column_ids = resolve_column_ids(&self.logical.columns, &all_columns)?;
        self.table_column_num = all_columns.len();
        self.indexes = collect_index_infos(&self.db, &self.logical.table_name, &all_columns)?;

        acquire_write_locks(&self.db, &self.logical.table_name, &self.indexes)?;
        self.locked = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        let values = match self.logical.values.get(self.cursor) {
            None => return Ok(None),
            Some(values) => values.clone(),
        };
        self.cursor += 1;

        let row = self.pad_null(&values);
        let location = self
            .db
            .table_tuple_insert_one(&self.logical.table_name, &row)
            .map_err(|e| {
                DbError::Storage(format!(
                    "cannot insert data into the table {}: {}",
                    self.logical.table_name, e
                ))
            })?;
        for index in &self.indexes {
            self.db
                .index_tuple_insert_one(&index.index_name, &index.key_of(&row), location)?;
        }
        debug!("inserted row at {} of {}", location, self.logical.table_name);
        Ok(Some(Vec::new()))
    }

    fn close(&mut self) -> DbResult<()> {
        release_write_locks(&self.db, &self.logical.table_name, &self.indexes, self.locked);
        self.locked = false;
        Ok(())
    }
}

/// UPDATE: the single `LocationScan` child supplies the victim
/// locations; each tuple is rewritten in place (or relocated) and every
/// index entry is repointed at the new location.
pub struct PhysicalUpdate {
    db: Arc<Database>,
    logical: UpdateOperator,
    child: LocationScan,
    column_ids: Vec<usize>,
    table_column_num: usize,
    indexes: Vec<IndexInfo>,
    locked: bool,
}

impl PhysicalUpdate {
    pub fn new(db: Arc<Database>, logical: UpdateOperator, child: LocationScan) -> Self {
        Self {
            db,
            logical,
            child,
            column_ids: Vec::new(),
            table_column_num: 0,
            indexes: Vec::new(),
            locked: false,
        }
    }

    fn updated_row(&self, old: &Row) -> Row {
        let mut row = old.clone();
        for (id, value) in self.column_ids.iter().zip(self.logical.values.iter()) {
            row[*id] = value.clone();
        }
        debug_assert_eq!(row.len(), self.table_column_num);
        row
    }
}

impl PhysicalOperator for PhysicalUpdate {
    fn name(&self) -> &str {
        "Update"
    }

    fn columns(&self) -> &[TableColumn] {
        &[]
    }

    fn open(&mut self) -> DbResult<()> {
        let all_columns = self
            .db
            .catalog()
            .table(&self.logical.table_name)?
            .columns
            .clone();
        self.column_ids = resolve_column_ids(&self.logical.columns, &all_columns)?;
        self.table_column_num = all_columns.len();
        self.indexes = collect_index_infos(&self.db, &self.logical.table_name, &all_columns)?;

        self.child.open()?;

        acquire_write_locks(&self.db, &self.logical.table_name, &self.indexes)?;
        self.locked = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        let location = match self.child.next_location()? {
            None => return Ok(None),
            Some(location) => location,
        };

        let old_row = self
            .db
            .table_tuple_get_one(&self.logical.table_name, location)?;
        let new_row = self.updated_row(&old_row);
        let new_location = self
            .db
            .table_tuple_update_one(&self.logical.table_name, location, &new_row)
            .map_err(|e| {
                DbError::Storage(format!(
                    "cannot update data for the table {}: {}",
                    self.logical.table_name, e
                ))
            })?;

        for index in &self.indexes {
            self.db.index_tuple_update_one(
                &index.index_name,
                &index.key_of(&new_row),
                location,
                new_location,
            )?;
        }
        Ok(Some(Vec::new()))
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()?;
        release_write_locks(&self.db, &self.logical.table_name, &self.indexes, self.locked);
        self.locked = false;
        Ok(())
    }
}

/// DELETE: drains the materialized `LocationScan`, removes the matching
/// index entries row by row, then batch-deletes from the table once the
/// set is complete.
pub struct PhysicalDelete {
    db: Arc<Database>,
    logical: DeleteOperator,
    child: LocationScan,
    indexes: Vec<IndexInfo>,
    collected: Vec<Location>,
    table_deleted: bool,
    locked: bool,
}

impl PhysicalDelete {
    pub fn new(db: Arc<Database>, logical: DeleteOperator, child: LocationScan) -> Self {
        Self {
            db,
            logical,
            child,
            indexes: Vec::new(),
            collected: Vec::new(),
            table_deleted: false,
            locked: false,
        }
    }
}

impl PhysicalOperator for PhysicalDelete {
    fn name(&self) -> &str {
        "Delete"
    }

    fn columns(&self) -> &[TableColumn] {
        &[]
    }

    fn open(&mut self) -> DbResult<()> {
        let all_columns = self
            .db
            .catalog()
            .table(&self.logical.table_name)?
            .columns
            .clone();
        self.indexes = collect_index_infos(&self.db, &self.logical.table_name, &all_columns)?;

        self.child.open()?;

        acquire_write_locks(&self.db, &self.logical.table_name, &self.indexes)?;
        self.locked = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        match self.child.next_location()? {
            Some(location) => {
                let old_row = self
                    .db
                    .table_tuple_get_one(&self.logical.table_name, location)?;
                for index in &self.indexes {
                    self.db.index_tuple_delete_one(
                        &index.index_name,
                        &index.key_of(&old_row),
                        location,
                    )?;
                }
                self.collected.push(location);
                Ok(Some(Vec::new()))
            }
            None => {
                if !self.table_deleted {
                    self.table_deleted = true;
                    self.db
                        .table_tuple_delete_multiple(&self.logical.table_name, &self.collected)?;
                    debug!(
                        "deleted {} rows from {}",
                        self.collected.len(),
                        self.logical.table_name
                    );
                }
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()?;
        release_write_locks(&self.db, &self.logical.table_name, &self.indexes, self.locked);
        self.locked = false;
        Ok(())
    }
}
