use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// A single column value. The engine only knows integers and text; `Null`
/// doubles as the missing value in padded join output and as minus
/// infinity inside composite index keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Text(_) => 2,
        }
    }

    /// Comparison for predicate evaluation. Unlike the total [`Ord`] used
    /// by sorting and the b+ tree, comparing incompatible kinds here is a
    /// user error.
    pub fn try_cmp(&self, other: &Value) -> DbResult<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            _ => Err(DbError::ExecutorCheck(format!(
                "cannot compare {} with {}",
                self, other
            ))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            // Null sorts below everything, Int below Text.
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Int(v) => v.hash(state),
            Value::Text(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

/// A row as produced by scans and consumed by the executor.
pub type Row = Vec<Value>;

/// A composite index key. `Vec` ordering is lexicographic, and
/// `Value::Null` components compare below any concrete value, which gives
/// the minus-infinity behavior range scans rely on.
pub type IndexKey = Vec<Value>;

pub fn encode_row(row: &Row) -> DbResult<Vec<u8>> {
    Ok(bincode::serialize(row)?)
}

pub fn decode_row(bytes: &[u8]) -> DbResult<Row> {
    Ok(bincode::deserialize(bytes)?)
}

/// A fully qualified column identifier, e.g. `t1.id`. Command output
/// columns leave the table part empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableColumn {
    pub table_name: String,
    pub column_name: String,
}

impl TableColumn {
    pub fn new(table_name: &str, column_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            column_name: column_name.to_string(),
        }
    }

    /// A column that does not belong to a table, used by command output.
    pub fn bare(column_name: &str) -> Self {
        Self::new("", column_name)
    }
}

impl fmt::Display for TableColumn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.table_name.is_empty() {
            write!(f, "{}", self.column_name)
        } else {
            write!(f, "{}.{}", self.table_name, self.column_name)
        }
    }
}
