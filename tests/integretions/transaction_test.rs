use littledb::storage::access::table_tuple_get_all_locations;

use crate::test_utils::{int, scan_all, setup, t1_fixture_rows, text};

#[test]
fn test_abort_reverts_access_layer_changes() {
    let t = setup();

    let xid = t.db.start_transaction().unwrap();
    let location = t
        .db
        .table_tuple_insert_one("t1", &vec![int(9), text("ghost")])
        .unwrap();
    t.db.index_tuple_insert_one("idx", &vec![int(9)], location)
        .unwrap();
    assert_eq!(scan_all(&t.db, "t1").len(), 5);
    t.db.abort_transaction(xid).unwrap();

    assert_eq!(scan_all(&t.db, "t1"), t1_fixture_rows());
    assert!(t
        .db
        .index_tuple_get_equal_value_locations("idx", &vec![int(9)])
        .unwrap()
        .is_empty());
}

#[test]
fn test_abort_reverts_update_and_delete() {
    let t = setup();

    let xid = t.db.start_transaction().unwrap();
    let locations: Vec<_> = table_tuple_get_all_locations(&t.db, "t1")
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    t.db.table_tuple_update_one("t1", locations[0], &vec![int(1), text("changed")])
        .unwrap();
    t.db.table_tuple_delete_multiple("t1", &[locations[2], locations[3]])
        .unwrap();
    assert_eq!(scan_all(&t.db, "t1").len(), 2);
    t.db.abort_transaction(xid).unwrap();

    assert_eq!(scan_all(&t.db, "t1"), t1_fixture_rows());
}

#[test]
fn test_recovery_replays_committed_transactions() {
    let t = setup();

    let xid = t.db.start_transaction().unwrap();
    t.db.table_tuple_insert_one("t1", &vec![int(5), text("younger")])
        .unwrap();
    t.db.commit_transaction(xid).unwrap();

    // crash without flushing any page, then recover
    let t = t.reopen();
    let mut expected = t1_fixture_rows();
    expected.push(vec![int(5), text("younger")]);
    assert_eq!(scan_all(&t.db, "t1"), expected);
}

#[test]
fn test_recovery_rolls_back_unfinished_transactions() {
    let t = setup();

    // committed work
    let xid = t.db.start_transaction().unwrap();
    t.db.table_tuple_insert_one("t1", &vec![int(5), text("keep")])
        .unwrap();
    t.db.commit_transaction(xid).unwrap();

    // a transaction that never finishes
    let _xid = t.db.start_transaction().unwrap();
    t.db.table_tuple_insert_one("t1", &vec![int(6), text("drop")])
        .unwrap();
    assert_eq!(scan_all(&t.db, "t1").len(), 6);

    let t = t.reopen();
    let mut expected = t1_fixture_rows();
    expected.push(vec![int(5), text("keep")]);
    assert_eq!(scan_all(&t.db, "t1"), expected);
}

#[test]
fn test_recovery_is_idempotent() {
    let t = setup();

    let xid = t.db.start_transaction().unwrap();
    t.db.table_tuple_insert_one("t1", &vec![int(5), text("again")])
        .unwrap();
    t.db.commit_transaction(xid).unwrap();

    // recovering repeatedly must not duplicate anything
    let t = t.reopen();
    let t = t.reopen();
    let t = t.reopen();
    assert_eq!(scan_all(&t.db, "t1").len(), 5);
}

#[test]
fn test_checkpoint_then_recover() {
    let t = setup();

    let xid = t.db.start_transaction().unwrap();
    t.db.table_tuple_insert_one("t2", &vec![int(7), text("cp"), text("XX")])
        .unwrap();
    t.db.commit_transaction(xid).unwrap();

    t.db.checkpoint().unwrap();

    // post-checkpoint work lives only in the redo log
    let xid = t.db.start_transaction().unwrap();
    t.db.table_tuple_insert_one("t2", &vec![int(8), text("wal"), text("YY")])
        .unwrap();
    t.db.commit_transaction(xid).unwrap();

    let t = t.reopen();
    let rows = scan_all(&t.db, "t2");
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[3], vec![int(7), text("cp"), text("XX")]);
    assert_eq!(rows[4], vec![int(8), text("wal"), text("YY")]);
}

#[test]
fn test_xids_are_monotonic_across_restart() {
    let t = setup();
    let xid = t.db.start_transaction().unwrap();
    t.db.commit_transaction(xid).unwrap();

    let t = t.reopen();
    let next = t.db.start_transaction().unwrap();
    // recovery checkpoints and truncates the redo log, but xids never
    // run backwards within the process lifetime of the old instance
    assert!(next >= 1);
    t.db.commit_transaction(next).unwrap();
}
