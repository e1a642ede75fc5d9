use std::sync::Arc;
use std::time::Duration;

use littledb::catalog::{ColumnType, IndexForm, TableForm};
use littledb::config::DbConfig;
use littledb::database::Database;
use littledb::planner::{CompareOp, Condition, Operand};
use littledb::storage::access::table_tuple_get_all;
use littledb::storage::tuple::{Row, TableColumn, Value};
use tempfile::TempDir;

/// A database seeded with the fixture used across the suite:
/// `t1(id, name)` with four rows, `t2(id, name, address)` with three, and
/// the index `idx` on `t1(id)`.
pub struct TestDb {
    pub db: Arc<Database>,
    pub config: DbConfig,
    // keep the scratch directory alive for the duration of the test
    #[allow(dead_code)]
    dir: TempDir,
}

impl TestDb {
    /// Simulates a crash: drops the instance without flushing anything,
    /// then opens a fresh one over the same directory, which runs
    /// recovery.
    #[allow(dead_code)]
    pub fn reopen(self) -> TestDb {
        let TestDb { db, config, dir } = self;
        drop(db);
        let db = Database::open(config.clone()).unwrap();
        TestDb { db, config, dir }
    }
}

pub fn int(v: i64) -> Value {
    Value::Int(v)
}

pub fn text(v: &str) -> Value {
    Value::Text(v.to_string())
}

pub fn col(table: &str, column: &str) -> TableColumn {
    TableColumn::new(table, column)
}

/// `t.c <sign> constant`
pub fn condition(table: &str, column: &str, sign: CompareOp, constant: Value) -> Condition {
    Condition {
        left: Operand::Column(col(table, column)),
        sign,
        right: Operand::Const(constant),
    }
}

pub fn setup() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DbConfig::default().with_work_dir(dir.path().join("data"));
    config.lru_capacity = 8;
    config.sort_chunk_size = 2;
    config.lock_timeout = Duration::from_millis(2000);
    let db = Database::open(config.clone()).unwrap();

    {
        let mut catalog = db.mut_catalog();
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
                vec![
                    "id".to_string(),
                    "name".to_string(),
                    "address".to_string(),
                ],
                vec![ColumnType::Int, ColumnType::Text, ColumnType::Text],
            ))
            .unwrap();
        catalog
            .insert_index(IndexForm::new("idx", vec!["id".to_string()], "t1"))
            .unwrap();
    }

    let xid = db.start_transaction().unwrap();
    db.table_tuple_insert_one("t1", &vec![int(1), text("xiaoming")])
        .unwrap();
    db.table_tuple_insert_one("t1", &vec![int(2), text("xiaohong")])
        .unwrap();
    db.table_tuple_insert_one("t1", &vec![int(3), text("xiaoli")])
        .unwrap();
    db.table_tuple_insert_one("t1", &vec![int(4), text("xiaoguo")])
        .unwrap();

    db.table_tuple_insert_one("t2", &vec![int(1), text("ming"), text("BJ")])
        .unwrap();
    db.table_tuple_insert_one("t2", &vec![int(5), text("hong"), text("SH")])
        .unwrap();
    db.table_tuple_insert_one("t2", &vec![int(3), text("li"), text("SZ")])
        .unwrap();
    db.commit_transaction(xid).unwrap();

    db.index_tuple_create("idx", "t1", &["id".to_string()])
        .unwrap();

    TestDb { db, config, dir }
}

pub fn scan_all(db: &Arc<Database>, table: &str) -> Vec<Row> {
    table_tuple_get_all(db, table)
        .unwrap()
        .collect::<Result<Vec<Row>, _>>()
        .unwrap()
}

pub fn t1_fixture_rows() -> Vec<Row> {
    vec![
        vec![int(1), text("xiaoming")],
        vec![int(2), text("xiaohong")],
        vec![int(3), text("xiaoli")],
        vec![int(4), text("xiaoguo")],
    ]
}
