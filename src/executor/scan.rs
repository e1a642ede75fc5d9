use std::collections::VecDeque;
use std::sync::Arc;

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::executor::{bind_row, is_condition_true, PhysicalOperator};
use crate::planner::{CompareOp, Condition, Operand};
use crate::storage::access::TableTupleIter;
use crate::storage::tuple::{IndexKey, Row, TableColumn, Value};
use crate::storage::Location;
use crate::transaction::lock::{index_lock, table_lock, LockMode};
use crate::transaction::Xid;

fn scan_xid(db: &Database) -> DbResult<Xid> {
    db.session_xid()
        .ok_or_else(|| DbError::ExecutorCheck("no transaction bound to this thread".to_string()))
}

/// Full scan of a heap table, optionally filtered. Takes a shared lock on
/// the table for the lifetime of the operator.
pub struct TableScan {
    db: Arc<Database>,
    table_name: String,
    condition: Option<Condition>,
    columns: Vec<TableColumn>,
    iter: Option<TableTupleIter>,
    locked: bool,
}

impl TableScan {
    pub fn new(db: Arc<Database>, table_name: &str, condition: Option<Condition>) -> Self {
        Self {
            db,
            table_name: table_name.to_string(),
            condition,
            columns: Vec::new(),
            iter: None,
            locked: false,
        }
    }

    fn advance(&mut self) -> DbResult<Option<(Location, Row)>> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| DbError::ExecutorCheck("scan is not open".to_string()))?;
        loop {
            let (location, row) = match iter.next() {
                None => return Ok(None),
                Some(item) => item?,
            };
            match &self.condition {
                None => return Ok(Some((location, row))),
                Some(condition) => {
                    let values = bind_row(&self.columns, &row);
                    if is_condition_true(&values, condition)? {
                        return Ok(Some((location, row)));
                    }
                }
            }
        }
    }
}

impl PhysicalOperator for TableScan {
    fn name(&self) -> &str {
        "TableScan"
    }

    fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    fn open(&mut self) -> DbResult<()> {
        self.columns = {
            let catalog = self.db.catalog();
            let form = catalog.table(&self.table_name)?;
            form.columns
                .iter()
                .map(|c| TableColumn::new(&self.table_name, c))
                .collect()
        };

        let xid = scan_xid(&self.db)?;
        self.db
            .lock_manager()
            .acquire_lock(&table_lock(&self.table_name), xid, LockMode::Shared)?;
        self.locked = true;

        self.iter = Some(TableTupleIter::new(
            Arc::clone(&self.db),
            &self.table_name,
        )?);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        Ok(self.advance()?.map(|(_, row)| row))
    }

    fn next_location(&mut self) -> DbResult<Option<Location>> {
        Ok(self.advance()?.map(|(location, _)| location))
    }

    fn close(&mut self) -> DbResult<()> {
        self.iter = None;
        if self.locked {
            if let Some(xid) = self.db.session_xid() {
                self.db
                    .lock_manager()
                    .release_lock(&table_lock(&self.table_name), xid);
            }
            self.locked = false;
        }
        Ok(())
    }
}

/// Scan through a secondary index. The condition must compare one column
/// of the indexed table with a constant using `=`, `<` or `>`; equality
/// maps to a point lookup and the inequalities to range scans with the
/// constant as one endpoint.
pub struct IndexScan {
    db: Arc<Database>,
    index_name: String,
    condition: Condition,
    /// Return index keys directly instead of dereferencing the table.
    covered: bool,
    table_name: String,
    columns: Vec<TableColumn>,
    constant: Option<Value>,
    locations: VecDeque<Location>,
    keys: VecDeque<IndexKey>,
    locked: bool,
}

impl IndexScan {
    pub fn new(db: Arc<Database>, index_name: &str, condition: Condition) -> Self {
        Self {
            db,
            index_name: index_name.to_string(),
            condition,
            covered: false,
            table_name: String::new(),
            columns: Vec::new(),
            constant: None,
            locations: VecDeque::new(),
            keys: VecDeque::new(),
            locked: false,
        }
    }

    pub fn new_covered(db: Arc<Database>, index_name: &str, condition: Condition) -> Self {
        let mut scan = Self::new(db, index_name, condition);
        scan.covered = true;
        scan
    }

    fn split_condition(&mut self) -> DbResult<()> {
        let mut columns = Vec::new();
        let mut constants = Vec::new();
        for operand in [&self.condition.left, &self.condition.right].iter() {
            match operand {
                Operand::Column(column) => columns.push((*column).clone()),
                Operand::Const(value) => constants.push((*value).clone()),
            }
        }
        if columns.len() != 1 || constants.len() != 1 {
            return Err(DbError::ExecutorCheck(
                "only supported one condition/value column".to_string(),
            ));
        }
        self.constant = constants.pop();
        Ok(())
    }

    fn fill_in_columns(&mut self) -> DbResult<()> {
        let db = Arc::clone(&self.db);
        let catalog = db.catalog();
        let index_form = catalog.index(&self.index_name)?;
        self.table_name = index_form.table_name.clone();
        if self.covered {
            // covered output is the key itself
            self.columns = index_form
                .columns
                .iter()
                .map(|c| TableColumn::new(&self.table_name, c))
                .collect();
        } else {
            self.columns = catalog
                .table(&self.table_name)?
                .columns
                .iter()
                .map(|c| TableColumn::new(&self.table_name, c))
                .collect();
        }
        Ok(())
    }

    /// Endpoints depend on which side of the comparison the column sits:
    /// `100 < t1.a` means the scan starts at `(100,)`.
    fn range_bounds(&self) -> (Option<IndexKey>, Option<IndexKey>) {
        let key: IndexKey = vec![self.constant.clone().unwrap()];
        let column_on_left = matches!(self.condition.left, Operand::Column(_));
        match (self.condition.sign, column_on_left) {
            (CompareOp::Gt, true) | (CompareOp::Lt, false) => (Some(key), None),
            (CompareOp::Gt, false) | (CompareOp::Lt, true) => (None, Some(key)),
            _ => (None, None),
        }
    }

    fn run_index_query(&mut self) -> DbResult<()> {
        let equal_key: IndexKey = vec![self.constant.clone().unwrap()];
        match self.condition.sign {
            CompareOp::Eq => {
                if self.covered {
                    self.keys = self
                        .db
                        .covered_index_tuple_get_equal_value(&self.index_name, &equal_key)?
                        .into();
                } else {
                    self.locations = self
                        .db
                        .index_tuple_get_equal_value_locations(&self.index_name, &equal_key)?
                        .into();
                }
            }
            CompareOp::Lt | CompareOp::Gt => {
                let (start, end) = self.range_bounds();
                if self.covered {
                    self.keys = self
                        .db
                        .covered_index_tuple_get_range(
                            &self.index_name,
                            start.as_ref(),
                            end.as_ref(),
                        )?
                        .into();
                } else {
                    self.locations = self
                        .db
                        .index_tuple_get_range_locations(
                            &self.index_name,
                            start.as_ref(),
                            end.as_ref(),
                        )?
                        .into();
                }
            }
            CompareOp::NotEq => {
                return Err(DbError::ExecutorCheck(
                    "not supported operation != for IndexScan".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Range scans are inclusive at the start bound, so a strict
    /// comparison has to re-check the boundary row.
    fn row_matches(&self, row: &Row) -> DbResult<bool> {
        let values = bind_row(&self.columns, row);
        is_condition_true(&values, &self.condition)
    }
}

impl PhysicalOperator for IndexScan {
    fn name(&self) -> &str {
        if self.covered {
            "CoveredIndexScan"
        } else {
            "IndexScan"
        }
    }

    fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    fn open(&mut self) -> DbResult<()> {
        self.split_condition()?;
        self.fill_in_columns()?;

        let xid = scan_xid(&self.db)?;
        self.db
            .lock_manager()
            .acquire_lock(&index_lock(&self.index_name), xid, LockMode::Shared)?;
        self.locked = true;

        self.run_index_query()
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.covered {
            while let Some(key) = self.keys.pop_front() {
                let row: Row = key;
                if self.row_matches(&row)? {
                    return Ok(Some(row));
                }
            }
            return Ok(None);
        }
        while let Some(location) = self.locations.pop_front() {
            let row = self.db.table_tuple_get_one(&self.table_name, location)?;
            if self.row_matches(&row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn next_location(&mut self) -> DbResult<Option<Location>> {
        while let Some(location) = self.locations.pop_front() {
            let row = self.db.table_tuple_get_one(&self.table_name, location)?;
            let values = bind_row(&self.columns, &row);
            if is_condition_true(&values, &self.condition)? {
                return Ok(Some(location));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> DbResult<()> {
        self.locations.clear();
        self.keys.clear();
        if self.locked {
            if let Some(xid) = self.db.session_xid() {
                self.db
                    .lock_manager()
                    .release_lock(&index_lock(&self.index_name), xid);
            }
            self.locked = false;
        }
        Ok(())
    }
}

/// Proxy that drains the wrapped scan's locations up front, so deletes
/// and updates further up the tree cannot invalidate the scan they feed.
pub struct LocationScan {
    inner: Box<dyn PhysicalOperator + Send>,
    buffered: Option<VecDeque<Location>>,
}

impl LocationScan {
    pub fn new(inner: Box<dyn PhysicalOperator + Send>) -> Self {
        Self {
            inner,
            buffered: None,
        }
    }
}

impl PhysicalOperator for LocationScan {
    fn name(&self) -> &str {
        "LocationScan"
    }

    fn columns(&self) -> &[TableColumn] {
        &[]
    }

    fn open(&mut self) -> DbResult<()> {
        self.inner.open()
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        Err(DbError::ExecutorCheck(
            "LocationScan yields locations, not rows".to_string(),
        ))
    }

    fn next_location(&mut self) -> DbResult<Option<Location>> {
        if self.buffered.is_none() {
            let mut locations = VecDeque::new();
            while let Some(location) = self.inner.next_location()? {
                locations.push_back(location);
            }
            self.buffered = Some(locations);
        }
        Ok(self.buffered.as_mut().unwrap().pop_front())
    }

    fn close(&mut self) -> DbResult<()> {
        self.buffered = None;
        self.inner.close()
    }
}

/// Convenience wrapper used by the update/delete operators: a
/// `LocationScan` over a table scan with the statement's condition.
pub fn location_scan_over_table(
    db: Arc<Database>,
    table_name: &str,
    condition: Option<Condition>,
) -> LocationScan {
    LocationScan::new(Box::new(TableScan::new(db, table_name, condition)))
}
