pub mod lock;
pub mod redo;
pub mod undo;

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, info};

use crate::config::DbConfig;
use crate::database::Database;
use crate::error::DbResult;
use crate::transaction::redo::{RedoAction, RedoLogManager};
use crate::transaction::undo::UndoLogManager;

pub type Xid = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committing,
    Committed,
    Aborted,
}

thread_local! {
    /// The transaction bound to the current thread. Each statement runs
    /// as one transaction on one thread, so operators can always recover
    /// their xid from here.
    static CURRENT_XID: Cell<Option<Xid>> = Cell::new(None);
}

/// The xid bound to the calling thread, if any.
pub fn session_xid() -> Option<Xid> {
    CURRENT_XID.with(|x| x.get())
}

fn bind_session_xid(xid: Option<Xid>) {
    CURRENT_XID.with(|x| x.set(xid));
}

/// Allocates xids, owns the redo and undo logs and tracks transaction
/// states. The transaction lifecycle itself lives on [`Database`]
/// because rollback and recovery need the storage layer.
pub struct TransactionManager {
    next_xid: AtomicU64,
    pub(crate) redo: RedoLogManager,
    pub(crate) undo: UndoLogManager,
    statuses: Mutex<HashMap<Xid, TransactionStatus>>,
}

impl TransactionManager {
    pub fn open(config: &DbConfig) -> DbResult<Self> {
        let redo = RedoLogManager::open(config.redo_log_path())?;
        let undo = UndoLogManager::new(config.undo_dir());
        // xids restart from past the highest one the redo log remembers
        let max_seen = redo.replay()?.iter().map(|r| r.xid).max().unwrap_or(0);
        Ok(Self {
            next_xid: AtomicU64::new(max_seen + 1),
            redo,
            undo,
            statuses: Mutex::new(HashMap::new()),
        })
    }

    /// The most recently allocated xid.
    pub fn current_xid(&self) -> Xid {
        self.next_xid.load(Ordering::SeqCst).saturating_sub(1)
    }

    pub fn active_count(&self) -> usize {
        self.statuses
            .lock()
            .unwrap()
            .values()
            .filter(|s| matches!(s, TransactionStatus::Active | TransactionStatus::Committing))
            .count()
    }

    fn set_status(&self, xid: Xid, status: TransactionStatus) {
        self.statuses.lock().unwrap().insert(xid, status);
    }

    pub fn status(&self, xid: Xid) -> Option<TransactionStatus> {
        self.statuses.lock().unwrap().get(&xid).copied()
    }
}

impl Database {
    /// Allocates the next xid, binds it to the calling thread, writes the
    /// BEGIN redo record and opens the undo file.
    pub fn start_transaction(&self) -> DbResult<Xid> {
        let xid = self.tx_mgr.next_xid.fetch_add(1, Ordering::SeqCst);
        self.tx_mgr
            .redo
            .write(xid, RedoAction::Begin, None, None, Vec::new())?;
        self.tx_mgr.undo.start_transaction(xid)?;
        self.tx_mgr.set_status(xid, TransactionStatus::Active);
        bind_session_xid(Some(xid));
        self.transaction_count.fetch_add(1, Ordering::Relaxed);
        debug!("transaction {} started", xid);
        Ok(xid)
    }

    /// Makes the transaction durable: COMMIT record written and the redo
    /// log forced to disk before any lock is released.
    pub fn commit_transaction(&self, xid: Xid) -> DbResult<()> {
        self.tx_mgr.set_status(xid, TransactionStatus::Committing);
        self.tx_mgr
            .redo
            .write(xid, RedoAction::Commit, None, None, Vec::new())?;
        self.tx_mgr.redo.flush()?;
        self.tx_mgr.undo.commit_transaction(xid)?;

        self.lock_manager().release_all(xid);
        self.tx_mgr.set_status(xid, TransactionStatus::Committed);
        if session_xid() == Some(xid) {
            bind_session_xid(None);
        }
        debug!("transaction {} committed", xid);
        Ok(())
    }

    /// Reverts the transaction by replaying its undo records in reverse,
    /// then writes the ABORT record.
    pub fn abort_transaction(&self, xid: Xid) -> DbResult<()> {
        for record in self.tx_mgr.undo.parse_records(xid)? {
            if record.is_marker() {
                continue;
            }
            self.apply_undo_record(&record)?;
        }
        self.tx_mgr
            .redo
            .write(xid, RedoAction::Abort, None, None, Vec::new())?;
        self.tx_mgr.redo.flush()?;
        self.tx_mgr.undo.abort_transaction(xid)?;

        self.lock_manager().release_all(xid);
        self.tx_mgr.set_status(xid, TransactionStatus::Aborted);
        if session_xid() == Some(xid) {
            bind_session_xid(None);
        }
        info!("transaction {} aborted", xid);
        Ok(())
    }

    /// Flushes all dirty state, truncates the redo log and prunes undo
    /// files of completed transactions.
    pub fn checkpoint(&self) -> DbResult<()> {
        self.pager().flush_all()?;
        self.index_store().flush_all()?;
        self.tx_mgr.redo.reset()?;
        self.tx_mgr
            .redo
            .write(0, RedoAction::Checkpoint, None, None, Vec::new())?;
        self.tx_mgr.redo.flush()?;
        self.tx_mgr.undo.remove_completed()?;
        info!("checkpoint complete");
        Ok(())
    }

    /// Crash recovery: re-applies the actions of committed transactions
    /// recorded since the last checkpoint (skipping pages whose LSN shows
    /// the change already present), then rolls back transactions that
    /// never finished. Ends with a checkpoint so that recovering again is
    /// a no-op.
    pub fn recovery(&self) -> DbResult<()> {
        let records = self.tx_mgr.redo.replay()?;
        let committed: std::collections::HashSet<Xid> = records
            .iter()
            .filter(|r| r.action == RedoAction::Commit)
            .map(|r| r.xid)
            .collect();

        let mut redone = 0usize;
        for record in &records {
            if committed.contains(&record.xid) {
                self.apply_redo_record(record)?;
                redone += 1;
            }
        }

        let mut rolled_back = 0usize;
        for xid in self.tx_mgr.undo.unresolved_xids()? {
            for record in self.tx_mgr.undo.parse_records(xid)? {
                if record.is_marker() {
                    continue;
                }
                self.apply_undo_record(&record)?;
            }
            self.tx_mgr.undo.remove(xid)?;
            rolled_back += 1;
        }

        if redone > 0 || rolled_back > 0 {
            info!(
                "recovery replayed {} redo records, rolled back {} transactions",
                redone, rolled_back
            );
        }
        self.checkpoint()
    }

    /// The xid bound to the calling thread; operators use this to take
    /// locks on behalf of the running statement.
    pub fn session_xid(&self) -> Option<Xid> {
        session_xid()
    }
}
