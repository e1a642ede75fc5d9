use littledb::executor::exec_query;
use littledb::storage::tuple::Value;

use crate::test_utils::{int, scan_all, setup, text};

#[test]
fn test_select_statements() {
    let t = setup();

    let result = exec_query(&t.db, "select * from t1").unwrap();
    assert_eq!(result.rows.len(), 4);
    let columns = result.target_columns.unwrap();
    assert_eq!(columns[0].to_string(), "t1.id");
    assert_eq!(columns[1].to_string(), "t1.name");

    let result = exec_query(&t.db, "select t1.name from t1 where t1.id > 3").unwrap();
    assert_eq!(result.rows, vec![vec![text("xiaoguo")]]);

    let result = exec_query(&t.db, "select t1.name from t1 where t1.name != 'xiaoli'").unwrap();
    assert_eq!(result.rows.len(), 3);

    let result = exec_query(&t.db, "select * from t1 order by t1.name desc").unwrap();
    assert_eq!(
        result.rows.first().unwrap(),
        &vec![int(1), text("xiaoming")]
    );

    let result = exec_query(&t.db, "select count(t1.name) from t1 group by t1.id").unwrap();
    assert_eq!(result.rows.len(), 4);
    assert!(result.rows.iter().all(|r| r[1] == int(1)));
}

#[test]
fn test_index_backed_select() {
    let t = setup();

    // equality over the indexed column goes through the index
    let result = exec_query(&t.db, "select * from t1 where t1.id = 1").unwrap();
    assert_eq!(result.rows, vec![vec![int(1), text("xiaoming")]]);

    // only indexed columns projected: covered scan returns the key
    let result = exec_query(&t.db, "select t1.id from t1 where t1.id > 3").unwrap();
    assert_eq!(result.rows, vec![vec![int(4)]]);
}

#[test]
fn test_join_select() {
    let t = setup();

    let result = exec_query(&t.db, "select * from t1 left join t2 on t1.id = t2.id").unwrap();
    assert_eq!(result.rows.len(), 4);

    let result = exec_query(
        &t.db,
        "select t1.name from t1 left join t2 on t1.id = t2.id where t2.name = 'ming'",
    )
    .unwrap();
    assert_eq!(result.rows, vec![vec![text("xiaoming")]]);
}

#[test]
fn test_dml_round_trip() {
    let t = setup();

    let result = exec_query(&t.db, "insert into t1 values (1, 'a'), (2, 'b')").unwrap();
    assert!(result.target_columns.is_none());
    assert_eq!(result.rows.len(), 2);
    assert_eq!(scan_all(&t.db, "t1").len(), 6);

    let result = exec_query(&t.db, "update t1 set name = 'c' where t1.id > 1").unwrap();
    assert_eq!(result.rows.len(), 4);

    let result = exec_query(&t.db, "delete from t1 where t1.name = 'c'").unwrap();
    assert_eq!(result.rows.len(), 4);
    assert_eq!(scan_all(&t.db, "t1").len(), 2);
}

#[test]
fn test_ddl_and_insert_into_new_table() {
    let t = setup();

    exec_query(&t.db, "create table t3 (id int, name text)").unwrap();
    exec_query(&t.db, "insert into t3 values (1, 'first')").unwrap();
    exec_query(&t.db, "create index idx3 on t3 (id)").unwrap();
    exec_query(&t.db, "insert into t3 values (1, 'second')").unwrap();

    let result = exec_query(&t.db, "select t3.name from t3 where t3.id = 1").unwrap();
    assert_eq!(result.rows, vec![vec![text("first")], vec![text("second")]]);
}

#[test]
fn test_show_and_checkpoint() {
    let t = setup();

    exec_query(&t.db, "select * from t1").unwrap();
    let result = exec_query(&t.db, "show variables").unwrap();
    let names: Vec<String> = result.rows.iter().map(|r| r[0].to_string()).collect();
    assert_eq!(
        names,
        vec!["transaction_count", "current_xid", "activity_count"]
    );
    // the seed transaction plus the select above
    assert!(matches!(result.rows[0][1], Value::Int(n) if n >= 2));
    assert_eq!(result.rows[2][1], int(0));

    let result = exec_query(&t.db, "checkpoint").unwrap();
    assert!(result.target_columns.is_none());
}

#[test]
fn test_errors_are_classified() {
    let t = setup();

    // unknown table: a notice, not a rollback
    let err = exec_query(&t.db, "select * from missing").unwrap_err();
    assert!(!err.is_rollback());

    // bad syntax
    let err = exec_query(&t.db, "selectx").unwrap_err();
    assert!(!err.is_rollback());

    // unknown aggregate surfaces as an executor check
    let err = exec_query(&t.db, "select median(t1.name) from t1 group by t1.id").unwrap_err();
    assert!(!err.is_rollback());

    // failures leave no locks behind
    assert_eq!(t.db.lock_manager().lock_count(), 0);
    assert_eq!(scan_all(&t.db, "t1").len(), 4);
}
