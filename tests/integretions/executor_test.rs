use littledb::executor::agg::HashAgg;
use littledb::executor::dml::{PhysicalDelete, PhysicalInsert, PhysicalUpdate};
use littledb::executor::join::{JoinType, NestedLoopJoin};
use littledb::executor::query::PhysicalQuery;
use littledb::executor::scan::{location_scan_over_table, IndexScan, TableScan};
use littledb::executor::sort::{Sort, SortMethod};
use littledb::executor::{exec_plan, PhysicalOperator};
use littledb::planner::{CompareOp, Condition, DeleteOperator, InsertOperator, Operand, UpdateOperator};
use littledb::storage::tuple::{Row, Value};

use crate::test_utils::{col, condition, int, scan_all, setup, t1_fixture_rows, text, TestDb};

fn drain(op: &mut dyn PhysicalOperator) -> Vec<Row> {
    op.open().unwrap();
    let mut rows = Vec::new();
    while let Some(row) = op.next().unwrap() {
        rows.push(row);
    }
    op.close().unwrap();
    rows
}

fn with_transaction(t: &TestDb, body: impl FnOnce()) {
    let xid = t.db.start_transaction().unwrap();
    body();
    t.db.commit_transaction(xid).unwrap();
    // operator hygiene: no lock survives the statement
    assert_eq!(t.db.lock_manager().lock_count(), 0);
}

#[test]
fn test_table_scan() {
    let t = setup();
    with_transaction(&t, || {
        let mut scan = TableScan::new(t.db.clone(), "t1", None);
        assert_eq!(drain(&mut scan), t1_fixture_rows());

        let mut scan = TableScan::new(
            t.db.clone(),
            "t1",
            Some(condition("t1", "id", CompareOp::Gt, int(3))),
        );
        assert_eq!(drain(&mut scan), vec![vec![int(4), text("xiaoguo")]]);

        let mut scan = TableScan::new(
            t.db.clone(),
            "t1",
            Some(condition("t1", "id", CompareOp::Lt, int(0))),
        );
        assert_eq!(drain(&mut scan), Vec::<Row>::new());

        let mut scan = TableScan::new(
            t.db.clone(),
            "t1",
            Some(condition("t1", "id", CompareOp::Eq, int(1))),
        );
        assert_eq!(drain(&mut scan), vec![vec![int(1), text("xiaoming")]]);
    });
}

#[test]
fn test_index_scan() {
    let t = setup();
    with_transaction(&t, || {
        let mut scan = IndexScan::new(
            t.db.clone(),
            "idx",
            condition("t1", "id", CompareOp::Gt, int(3)),
        );
        assert_eq!(drain(&mut scan), vec![vec![int(4), text("xiaoguo")]]);

        let mut scan = IndexScan::new(
            t.db.clone(),
            "idx",
            condition("t1", "id", CompareOp::Lt, int(0)),
        );
        assert_eq!(drain(&mut scan), Vec::<Row>::new());

        let mut scan = IndexScan::new(
            t.db.clone(),
            "idx",
            condition("t1", "id", CompareOp::Eq, int(1)),
        );
        assert_eq!(drain(&mut scan), vec![vec![int(1), text("xiaoming")]]);

        // constant on the left: 100 < t1.id scans from (100,)
        let mut scan = IndexScan::new(
            t.db.clone(),
            "idx",
            Condition {
                left: Operand::Const(int(2)),
                sign: CompareOp::Lt,
                right: Operand::Column(col("t1", "id")),
            },
        );
        assert_eq!(
            drain(&mut scan),
            vec![
                vec![int(3), text("xiaoli")],
                vec![int(4), text("xiaoguo")],
            ]
        );
    });
}

#[test]
fn test_covered_index_scan() {
    let t = setup();
    with_transaction(&t, || {
        let mut scan = IndexScan::new_covered(
            t.db.clone(),
            "idx",
            condition("t1", "id", CompareOp::Gt, int(3)),
        );
        assert_eq!(drain(&mut scan), vec![vec![int(4)]]);

        let mut scan = IndexScan::new_covered(
            t.db.clone(),
            "idx",
            condition("t1", "id", CompareOp::Lt, int(0)),
        );
        assert_eq!(drain(&mut scan), Vec::<Row>::new());

        let mut scan = IndexScan::new_covered(
            t.db.clone(),
            "idx",
            condition("t1", "id", CompareOp::Eq, int(1)),
        );
        assert_eq!(drain(&mut scan), vec![vec![int(1)]]);
    });
}

#[test]
fn test_external_sort() {
    let t = setup();
    with_transaction(&t, || {
        let mut sort = Sort::new(
            t.db.clone(),
            col("t1", "name"),
            true,
            SortMethod::External,
            Box::new(TableScan::new(t.db.clone(), "t1", None)),
        );
        assert_eq!(
            drain(&mut sort),
            vec![
                vec![int(4), text("xiaoguo")],
                vec![int(2), text("xiaohong")],
                vec![int(3), text("xiaoli")],
                vec![int(1), text("xiaoming")],
            ]
        );
    });
    // no temp files left behind
    let leftovers: Vec<_> = std::fs::read_dir(t.config.temp_dir())
        .map(|entries| entries.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty());
}

#[test]
fn test_internal_sort_descending() {
    let t = setup();
    with_transaction(&t, || {
        let mut sort = Sort::new(
            t.db.clone(),
            col("t1", "id"),
            false,
            SortMethod::Internal,
            Box::new(TableScan::new(t.db.clone(), "t1", None)),
        );
        let ids: Vec<Value> = drain(&mut sort).into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![int(4), int(3), int(2), int(1)]);
    });
}

#[test]
fn test_full_join() {
    let t = setup();
    with_transaction(&t, || {
        let mut join = NestedLoopJoin::new(
            JoinType::Full,
            "t1",
            "t2",
            Some(Condition {
                left: Operand::Column(col("t1", "id")),
                sign: CompareOp::Eq,
                right: Operand::Column(col("t2", "id")),
            }),
            Box::new(TableScan::new(t.db.clone(), "t1", None)),
            Box::new(TableScan::new(t.db.clone(), "t2", None)),
        );
        let rows = drain(&mut join);
        assert_eq!(
            rows,
            vec![
                vec![int(1), text("xiaoming"), int(1), text("ming"), text("BJ")],
                vec![int(2), text("xiaohong"), Value::Null, Value::Null, Value::Null],
                vec![int(3), text("xiaoli"), int(3), text("li"), text("SZ")],
                vec![int(4), text("xiaoguo"), Value::Null, Value::Null, Value::Null],
                vec![Value::Null, Value::Null, int(5), text("hong"), text("SH")],
            ]
        );
        // 2 inner matches + 2 unmatched left + 1 unmatched right
        assert_eq!(rows.len(), 5);
    });
}

#[test]
fn test_inner_and_left_join() {
    let t = setup();
    with_transaction(&t, || {
        let join_condition = || {
            Some(Condition {
                left: Operand::Column(col("t1", "id")),
                sign: CompareOp::Eq,
                right: Operand::Column(col("t2", "id")),
            })
        };

        let mut join = NestedLoopJoin::new(
            JoinType::Inner,
            "t1",
            "t2",
            join_condition(),
            Box::new(TableScan::new(t.db.clone(), "t1", None)),
            Box::new(TableScan::new(t.db.clone(), "t2", None)),
        );
        assert_eq!(drain(&mut join).len(), 2);

        let mut join = NestedLoopJoin::new(
            JoinType::Left,
            "t1",
            "t2",
            join_condition(),
            Box::new(TableScan::new(t.db.clone(), "t1", None)),
            Box::new(TableScan::new(t.db.clone(), "t2", None)),
        );
        assert_eq!(drain(&mut join).len(), 4);

        // RIGHT emits per right row, left columns first
        let mut join = NestedLoopJoin::new(
            JoinType::Right,
            "t1",
            "t2",
            join_condition(),
            Box::new(TableScan::new(t.db.clone(), "t1", None)),
            Box::new(TableScan::new(t.db.clone(), "t2", None)),
        );
        let rows = drain(&mut join);
        assert_eq!(
            rows,
            vec![
                vec![int(1), text("xiaoming"), int(1), text("ming"), text("BJ")],
                vec![Value::Null, Value::Null, int(5), text("hong"), text("SH")],
                vec![int(3), text("xiaoli"), int(3), text("li"), text("SZ")],
            ]
        );

        let mut join = NestedLoopJoin::new(
            JoinType::Cross,
            "t1",
            "t2",
            None,
            Box::new(TableScan::new(t.db.clone(), "t1", None)),
            Box::new(TableScan::new(t.db.clone(), "t2", None)),
        );
        assert_eq!(drain(&mut join).len(), 4 * 3);
    });
}

#[test]
fn test_hash_agg() {
    let t = setup();
    with_transaction(&t, || {
        let mut agg = HashAgg::new(
            t.db.clone(),
            col("t1", "id"),
            "count",
            col("t1", "name"),
            Box::new(TableScan::new(t.db.clone(), "t1", None)),
        );
        assert_eq!(
            drain(&mut agg),
            vec![
                vec![int(1), int(1)],
                vec![int(2), int(1)],
                vec![int(3), int(1)],
                vec![int(4), int(1)],
            ]
        );

        let mut agg = HashAgg::new(
            t.db.clone(),
            col("t2", "name"),
            "sum",
            col("t2", "id"),
            Box::new(TableScan::new(t.db.clone(), "t2", None)),
        );
        assert_eq!(
            drain(&mut agg),
            vec![
                vec![text("ming"), int(1)],
                vec![text("hong"), int(5)],
                vec![text("li"), int(3)],
            ]
        );
    });
}

#[test]
fn test_hash_agg_unknown_function() {
    let t = setup();
    let xid = t.db.start_transaction().unwrap();
    let mut agg = HashAgg::new(
        t.db.clone(),
        col("t1", "id"),
        "median",
        col("t1", "name"),
        Box::new(TableScan::new(t.db.clone(), "t1", None)),
    );
    let err = agg.open().unwrap_err();
    assert!(!err.is_rollback());
    agg.close().unwrap();
    t.db.commit_transaction(xid).unwrap();
}

#[test]
fn test_physical_query_projection() {
    let t = setup();
    with_transaction(&t, || {
        let mut query = PhysicalQuery::new(
            vec![col("t1", "name")],
            Box::new(TableScan::new(
                t.db.clone(),
                "t1",
                Some(condition("t1", "id", CompareOp::Gt, int(2))),
            )),
        );
        let rows = drain(&mut query);
        assert_eq!(rows, vec![vec![text("xiaoli")], vec![text("xiaoguo")]]);
        assert_eq!(query.actual_rows(), 2);
        assert!(query.elapsed_time().is_some());
    });
}

#[test]
fn test_physical_dml() {
    let t = setup();
    let xid = t.db.start_transaction().unwrap();

    // insert (1, 'foo'), (2, 'bar')
    let mut insert = PhysicalInsert::new(
        t.db.clone(),
        InsertOperator {
            table_name: "t1".to_string(),
            columns: vec![col("t1", "id"), col("t1", "name")],
            values: vec![vec![int(1), text("foo")], vec![int(2), text("bar")]],
        },
    );
    exec_plan(&mut insert).unwrap();
    let mut expected = t1_fixture_rows();
    expected.push(vec![int(1), text("foo")]);
    expected.push(vec![int(2), text("bar")]);
    assert_eq!(scan_all(&t.db, "t1"), expected);

    // delete where name = 'foo'
    let delete_condition = condition("t1", "name", CompareOp::Eq, text("foo"));
    let mut delete = PhysicalDelete::new(
        t.db.clone(),
        DeleteOperator {
            table_name: "t1".to_string(),
            condition: Some(delete_condition.clone()),
        },
        location_scan_over_table(t.db.clone(), "t1", Some(delete_condition)),
    );
    exec_plan(&mut delete).unwrap();
    let mut expected = t1_fixture_rows();
    expected.push(vec![int(2), text("bar")]);
    assert_eq!(scan_all(&t.db, "t1"), expected);

    // update name = 'foo' where name = 'bar'
    let update_condition = condition("t1", "name", CompareOp::Eq, text("bar"));
    let mut update = PhysicalUpdate::new(
        t.db.clone(),
        UpdateOperator {
            table_name: "t1".to_string(),
            columns: vec![col("t1", "name")],
            values: vec![text("foo")],
            condition: Some(update_condition.clone()),
        },
        location_scan_over_table(t.db.clone(), "t1", Some(update_condition)),
    );
    exec_plan(&mut update).unwrap();
    let mut expected = t1_fixture_rows();
    expected.push(vec![int(2), text("foo")]);
    assert_eq!(scan_all(&t.db, "t1"), expected);

    // delete where name = 'foo' again
    let delete_condition = condition("t1", "name", CompareOp::Eq, text("foo"));
    let mut delete = PhysicalDelete::new(
        t.db.clone(),
        DeleteOperator {
            table_name: "t1".to_string(),
            condition: Some(delete_condition.clone()),
        },
        location_scan_over_table(t.db.clone(), "t1", Some(delete_condition)),
    );
    exec_plan(&mut delete).unwrap();

    t.db.commit_transaction(xid).unwrap();

    // back to the initial four rows, index included
    assert_eq!(scan_all(&t.db, "t1"), t1_fixture_rows());
    assert_eq!(
        t.db.covered_index_tuple_get_equal_value("idx", &vec![int(1)])
            .unwrap(),
        vec![vec![int(1)]]
    );
    assert_eq!(t.db.lock_manager().lock_count(), 0);
}

#[test]
fn test_abort_update_restores_index() {
    let t = setup();

    let xid = t.db.start_transaction().unwrap();
    let update_condition = condition("t1", "id", CompareOp::Eq, int(2));
    let mut update = PhysicalUpdate::new(
        t.db.clone(),
        UpdateOperator {
            table_name: "t1".to_string(),
            columns: vec![col("t1", "name")],
            values: vec![text("zzz")],
            condition: Some(update_condition.clone()),
        },
        location_scan_over_table(t.db.clone(), "t1", Some(update_condition)),
    );
    exec_plan(&mut update).unwrap();
    t.db.abort_transaction(xid).unwrap();

    assert_eq!(scan_all(&t.db, "t1"), t1_fixture_rows());
    // the unchanged key still has exactly one entry
    assert_eq!(
        t.db.covered_index_tuple_get_equal_value("idx", &vec![int(2)])
            .unwrap(),
        vec![vec![int(2)]]
    );
    let locations = t
        .db
        .index_tuple_get_equal_value_locations("idx", &vec![int(2)])
        .unwrap();
    assert_eq!(
        t.db.table_tuple_get_one("t1", locations[0]).unwrap(),
        vec![int(2), text("xiaohong")]
    );
}

#[test]
fn test_abort_physical_dml() {
    let t = setup();
    let old_rows = scan_all(&t.db, "t1");

    let xid = t.db.start_transaction().unwrap();
    let mut insert = PhysicalInsert::new(
        t.db.clone(),
        InsertOperator {
            table_name: "t1".to_string(),
            columns: vec![col("t1", "id"), col("t1", "name")],
            values: vec![vec![int(1), text("hello")], vec![int(2), text("world")]],
        },
    );
    exec_plan(&mut insert).unwrap();

    let mut inserted = old_rows.clone();
    inserted.push(vec![int(1), text("hello")]);
    inserted.push(vec![int(2), text("world")]);
    assert_eq!(scan_all(&t.db, "t1"), inserted);

    t.db.abort_transaction(xid).unwrap();
    assert_eq!(scan_all(&t.db, "t1"), old_rows);
    // the index was rolled back too
    assert_eq!(
        t.db.covered_index_tuple_get_equal_value("idx", &vec![int(1)])
            .unwrap(),
        vec![vec![int(1)]]
    );
}
