use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::storage::tuple::Value;

const TABLE_INFORMATION: &str = "table_information";
const INDEX_INFORMATION: &str = "index_information";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ColumnType::Int => write!(f, "int"),
            ColumnType::Text => write!(f, "text"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableForm {
    pub table_name: String,
    pub columns: Vec<String>,
    pub types: Vec<ColumnType>,
}

impl TableForm {
    pub fn new(table_name: &str, columns: Vec<String>, types: Vec<ColumnType>) -> Self {
        assert_eq!(columns.len(), types.len());
        Self {
            table_name: table_name.to_string(),
            columns,
            types,
        }
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

impl fmt::Display for TableForm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fields: Vec<String> = self
            .columns
            .iter()
            .zip(&self.types)
            .map(|(c, t)| format!("{} {}", c, t))
            .collect();
        write!(f, "CREATE TABLE {} ({});", self.table_name, fields.join(", "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexForm {
    pub index_name: String,
    pub columns: Vec<String>,
    pub table_name: String,
}

impl IndexForm {
    pub fn new(index_name: &str, columns: Vec<String>, table_name: &str) -> Self {
        Self {
            index_name: index_name.to_string(),
            columns,
            table_name: table_name.to_string(),
        }
    }
}

impl fmt::Display for IndexForm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CREATE INDEX {} ON {} ({});",
            self.index_name,
            self.table_name,
            self.columns.join(", ")
        )
    }
}

pub type AggregateFn = fn(&[Value]) -> DbResult<Value>;

/// Built-in functions are plain function pointers, so they are registered
/// at startup rather than persisted.
#[derive(Clone)]
pub struct FunctionForm {
    pub function_name: String,
    pub arg_num: i32,
    pub callback: AggregateFn,
    pub is_agg: bool,
}

fn agg_count(values: &[Value]) -> DbResult<Value> {
    Ok(Value::Int(values.len() as i64))
}

fn agg_sum(values: &[Value]) -> DbResult<Value> {
    let mut total = 0i64;
    for value in values {
        match value {
            Value::Int(v) => total += v,
            other => {
                return Err(DbError::ExecutorCheck(format!(
                    "sum expects integers, got {}",
                    other
                )))
            }
        }
    }
    Ok(Value::Int(total))
}

fn agg_min(values: &[Value]) -> DbResult<Value> {
    let mut best: Option<&Value> = None;
    for value in values {
        match best {
            None => best = Some(value),
            Some(current) => {
                if value.try_cmp(current)? == std::cmp::Ordering::Less {
                    best = Some(value);
                }
            }
        }
    }
    best.cloned()
        .ok_or_else(|| DbError::ExecutorCheck("min of an empty group".to_string()))
}

fn agg_max(values: &[Value]) -> DbResult<Value> {
    let mut best: Option<&Value> = None;
    for value in values {
        match best {
            None => best = Some(value),
            Some(current) => {
                if value.try_cmp(current)? == std::cmp::Ordering::Greater {
                    best = Some(value);
                }
            }
        }
    }
    best.cloned()
        .ok_or_else(|| DbError::ExecutorCheck("max of an empty group".to_string()))
}

fn agg_avg(values: &[Value]) -> DbResult<Value> {
    if values.is_empty() {
        return Err(DbError::ExecutorCheck("avg of an empty group".to_string()));
    }
    match agg_sum(values)? {
        Value::Int(total) => Ok(Value::Int(total / values.len() as i64)),
        _ => unreachable!(),
    }
}

lazy_static! {
    static ref BUILTIN_AGGREGATES: Vec<FunctionForm> = vec![
        FunctionForm {
            function_name: "count".to_string(),
            arg_num: -1,
            callback: agg_count,
            is_agg: true,
        },
        FunctionForm {
            function_name: "sum".to_string(),
            arg_num: -1,
            callback: agg_sum,
            is_agg: true,
        },
        FunctionForm {
            function_name: "min".to_string(),
            arg_num: -1,
            callback: agg_min,
            is_agg: true,
        },
        FunctionForm {
            function_name: "max".to_string(),
            arg_num: -1,
            callback: agg_max,
            is_agg: true,
        },
        FunctionForm {
            function_name: "avg".to_string(),
            arg_num: -1,
            callback: agg_avg,
            is_agg: true,
        },
    ];
}

/// In-memory registry of tables, indexes and functions. Table and index
/// forms persist as one bincode file per kind; every dump is fsynced.
pub struct Catalog {
    dir: PathBuf,
    tables: Vec<TableForm>,
    indexes: Vec<IndexForm>,
    functions: Vec<FunctionForm>,
}

impl Catalog {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            tables: Vec::new(),
            indexes: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Loads the persisted forms and registers the built-in aggregates.
    pub fn init(&mut self) -> DbResult<()> {
        self.tables = self.load_forms(TABLE_INFORMATION)?;
        self.indexes = self.load_forms(INDEX_INFORMATION)?;
        self.functions = BUILTIN_AGGREGATES.clone();
        Ok(())
    }

    fn load_forms<T: serde::de::DeserializeOwned>(&self, name: &str) -> DbResult<Vec<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    fn dump_forms<T: Serialize>(&self, name: &str, forms: &[T]) -> DbResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let mut file = File::create(path)?;
        file.write_all(&bincode::serialize(forms)?)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn table(&self, name: &str) -> DbResult<&TableForm> {
        self.tables
            .iter()
            .find(|t| t.table_name == name)
            .ok_or_else(|| DbError::LogicalPlan(format!("table {} does not exist", name)))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.table_name == name)
    }

    pub fn insert_table(&mut self, form: TableForm) -> DbResult<()> {
        if self.table_exists(&form.table_name) {
            return Err(DbError::LogicalPlan(format!(
                "table {} already exists",
                form.table_name
            )));
        }
        self.tables.push(form);
        self.dump_forms(TABLE_INFORMATION, &self.tables)
    }

    pub fn index(&self, name: &str) -> DbResult<&IndexForm> {
        self.indexes
            .iter()
            .find(|i| i.index_name == name)
            .ok_or_else(|| DbError::LogicalPlan(format!("index {} does not exist", name)))
    }

    pub fn indexes_of_table(&self, table_name: &str) -> Vec<IndexForm> {
        self.indexes
            .iter()
            .filter(|i| i.table_name == table_name)
            .cloned()
            .collect()
    }

    pub fn insert_index(&mut self, form: IndexForm) -> DbResult<()> {
        if self.indexes.iter().any(|i| i.index_name == form.index_name) {
            return Err(DbError::LogicalPlan(format!(
                "index {} already exists",
                form.index_name
            )));
        }
        self.indexes.push(form);
        self.dump_forms(INDEX_INFORMATION, &self.indexes)
    }

    pub fn delete_index(&mut self, name: &str) -> DbResult<()> {
        self.indexes.retain(|i| i.index_name != name);
        self.dump_forms(INDEX_INFORMATION, &self.indexes)
    }

    pub fn aggregate_function(&self, name: &str) -> DbResult<&FunctionForm> {
        self.functions
            .iter()
            .find(|f| f.function_name == name && f.is_agg)
            .ok_or_else(|| {
                DbError::ExecutorCheck(format!("not found the aggregation function {}", name))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        let mut catalog = Catalog::new(dir.path());
        catalog.init().unwrap();
        catalog
            .insert_table(TableForm::new(
                "t1",
                vec!["id".to_string(), "name".to_string()],
                vec![ColumnType::Int, ColumnType::Text],
            ))
            .unwrap();
        catalog
            .insert_table(TableForm::new(
                "t2",
                vec!["id".to_string(), "name".to_string(), "address".to_string()],
                vec![ColumnType::Int, ColumnType::Text, ColumnType::Text],
            ))
            .unwrap();
        catalog
            .insert_index(IndexForm::new("idx", vec!["id".to_string()], "t1"))
            .unwrap();

        // a fresh catalog reloads what was dumped
        let mut catalog2 = Catalog::new(dir.path());
        catalog2.init().unwrap();
        assert_eq!(
            catalog2.table("t1").unwrap().to_string(),
            "CREATE TABLE t1 (id int, name text);"
        );
        assert_eq!(
            catalog2.index("idx").unwrap().to_string(),
            "CREATE INDEX idx ON t1 (id);"
        );
        assert!(catalog2.table("t3").is_err());
    }

    #[test]
    fn test_builtin_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new(dir.path());
        catalog.init().unwrap();

        let values = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let call = |name: &str| {
            (catalog.aggregate_function(name).unwrap().callback)(&values).unwrap()
        };
        assert_eq!(call("count"), Value::Int(3));
        assert_eq!(call("sum"), Value::Int(6));
        assert_eq!(call("min"), Value::Int(1));
        assert_eq!(call("max"), Value::Int(3));
        assert_eq!(call("avg"), Value::Int(2));
        assert!(catalog.aggregate_function("median").is_err());
    }

    #[test]
    fn test_delete_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new(dir.path());
        catalog.init().unwrap();
        catalog
            .insert_index(IndexForm::new("idx", vec!["id".to_string()], "t1"))
            .unwrap();
        catalog.delete_index("idx").unwrap();
        assert!(catalog.index("idx").is_err());
        assert!(catalog.indexes_of_table("t1").is_empty());
    }
}
