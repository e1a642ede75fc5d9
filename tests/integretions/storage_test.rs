use littledb::executor::dml::PhysicalInsert;
use littledb::executor::exec_plan;
use littledb::planner::InsertOperator;
use littledb::storage::access::table_tuple_get_all_locations;
use littledb::storage::tuple::IndexKey;

use crate::test_utils::{col, int, scan_all, setup, t1_fixture_rows, text};

#[test]
fn test_table_tuple_get_all() {
    let t = setup();
    assert_eq!(scan_all(&t.db, "t1"), t1_fixture_rows());
}

#[test]
fn test_table_tuple_locations_follow_insertion_order() {
    let t = setup();
    let locations: Vec<_> = table_tuple_get_all_locations(&t.db, "t1")
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(locations.len(), 4);
    for (location, row) in locations.iter().zip(t1_fixture_rows()) {
        assert_eq!(t.db.table_tuple_get_one("t1", *location).unwrap(), row);
    }
}

#[test]
fn test_tuple_update_and_delete_via_access_layer() {
    let t = setup();
    let xid = t.db.start_transaction().unwrap();

    let locations: Vec<_> = table_tuple_get_all_locations(&t.db, "t1")
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let new_location = t
        .db
        .table_tuple_update_one("t1", locations[0], &vec![int(1), text("renamed")])
        .unwrap();
    assert_eq!(
        t.db.table_tuple_get_one("t1", new_location).unwrap(),
        vec![int(1), text("renamed")]
    );

    t.db.table_tuple_delete_multiple("t1", &[locations[1]]).unwrap();
    let rows = scan_all(&t.db, "t1");
    assert_eq!(
        rows,
        vec![
            vec![int(1), text("renamed")],
            vec![int(3), text("xiaoli")],
            vec![int(4), text("xiaoguo")],
        ]
    );

    t.db.commit_transaction(xid).unwrap();
}

#[test]
fn test_covered_index_tuple() {
    let t = setup();

    let key = |v: i64| -> IndexKey { vec![int(v)] };

    // [start, end) over the seeded ids 1..4
    let results = t
        .db
        .covered_index_tuple_get_range("idx", Some(&key(2)), Some(&key(4)))
        .unwrap();
    assert_eq!(results, vec![key(2), key(3)]);
    let results = t
        .db
        .covered_index_tuple_get_range("idx", Some(&key(2)), None)
        .unwrap();
    assert_eq!(results, vec![key(2), key(3), key(4)]);

    // a second row with id 2 shows up twice in an equal-value lookup
    let xid = t.db.start_transaction().unwrap();
    let mut insert = PhysicalInsert::new(
        t.db.clone(),
        InsertOperator {
            table_name: "t1".to_string(),
            columns: vec![col("t1", "id"), col("t1", "name")],
            values: vec![vec![int(2), text("xiaozhang")]],
        },
    );
    exec_plan(&mut insert).unwrap();
    t.db.commit_transaction(xid).unwrap();

    let results = t
        .db
        .covered_index_tuple_get_equal_value("idx", &key(2))
        .unwrap();
    assert_eq!(results, vec![key(2), key(2)]);
}

#[test]
fn test_index_tuple_locations_dereference() {
    let t = setup();
    let key: IndexKey = vec![int(1)];
    let locations = t
        .db
        .index_tuple_get_equal_value_locations("idx", &key)
        .unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(
        t.db.table_tuple_get_one("t1", locations[0]).unwrap(),
        vec![int(1), text("xiaoming")]
    );

    let locations = t
        .db
        .index_tuple_get_range_locations("idx", Some(&vec![int(2)]), Some(&vec![int(4)]))
        .unwrap();
    let rows: Vec<_> = locations
        .iter()
        .map(|l| t.db.table_tuple_get_one("t1", *l).unwrap())
        .collect();
    assert_eq!(
        rows,
        vec![
            vec![int(2), text("xiaohong")],
            vec![int(3), text("xiaoli")],
        ]
    );
}

#[test]
fn test_many_rows_span_pages() {
    let t = setup();
    let xid = t.db.start_transaction().unwrap();
    for i in 0..1000 {
        t.db.table_tuple_insert_one("t2", &vec![int(i), text("row"), text("addr")])
            .unwrap();
    }
    t.db.commit_transaction(xid).unwrap();

    assert!(t.db.pager().page_count("t2").unwrap() > 1);
    let rows = scan_all(&t.db, "t2");
    assert_eq!(rows.len(), 3 + 1000);
    // insertion order survives page boundaries
    assert_eq!(rows[3], vec![int(0), text("row"), text("addr")]);
    assert_eq!(rows[1002], vec![int(999), text("row"), text("addr")]);
}
