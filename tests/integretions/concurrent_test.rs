use std::sync::Arc;
use std::thread;

use littledb::executor::exec_query;

use crate::test_utils::setup;

/// Port of the classic smoke test: a pile of threads firing inserts,
/// deletes, selects and updates at one table. Some statements may lose
/// their lock race and roll back; the table must stay consistent and
/// non-empty.
#[test]
fn test_concurrency() {
    let t = setup();
    exec_query(&t.db, "create table t3 (id int, name text)").unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let db = Arc::clone(&t.db);
        handles.push(thread::spawn(move || {
            let _ = exec_query(&db, &format!("insert into t3 values ({}, 'rows')", i));
        }));
    }
    for i in 0..5 {
        let db = Arc::clone(&t.db);
        handles.push(thread::spawn(move || {
            let _ = exec_query(&db, &format!("delete from t3 where t3.id = {}", i));
        }));
    }
    for i in 0..20 {
        let db = Arc::clone(&t.db);
        handles.push(thread::spawn(move || {
            let _ = exec_query(&db, &format!("select * from t3 where t3.id = {}", i));
        }));
    }
    for i in 0..10 {
        let db = Arc::clone(&t.db);
        handles.push(thread::spawn(move || {
            let _ = exec_query(
                &db,
                &format!("update t3 set name = 'updated' where t3.id = {}", i),
            );
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // ids 5..9 are never deleted, and at least one insert must have won
    let result = exec_query(&t.db, "select * from t3").unwrap();
    assert!(!result.rows.is_empty());
    assert_eq!(t.db.lock_manager().lock_count(), 0);
}

#[test]
fn test_readers_share_the_table() {
    let t = setup();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = Arc::clone(&t.db);
        handles.push(thread::spawn(move || {
            exec_query(&db, "select * from t1").map(|r| r.rows.len())
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 4);
    }
}

#[test]
fn test_writer_blocks_reader_until_commit() {
    use std::time::Duration;

    let t = setup();
    let db = Arc::clone(&t.db);

    // a background transaction holds the exclusive lock for a while
    let writer = thread::spawn(move || {
        let xid = db.start_transaction().unwrap();
        db.lock_manager()
            .acquire_lock(
                &littledb::transaction::lock::table_lock("t1"),
                xid,
                littledb::transaction::lock::LockMode::Exclusive,
            )
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        db.commit_transaction(xid).unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    // the reader waits for the writer to finish, then proceeds
    let result = exec_query(&t.db, "select * from t1").unwrap();
    assert_eq!(result.rows.len(), 4);
    writer.join().unwrap();
}
