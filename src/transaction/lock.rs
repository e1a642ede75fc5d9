use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{DbError, DbResult};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKind {
    Table,
    Index,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockKind::Table => write!(f, "table"),
            LockKind::Index => write!(f, "index"),
        }
    }
}

/// Locks are taken on whole tables and indexes, keyed by kind and name.
pub type LockTarget = (LockKind, String);

pub fn table_lock(name: &str) -> LockTarget {
    (LockKind::Table, name.to_string())
}

pub fn index_lock(name: &str) -> LockTarget {
    (LockKind::Index, name.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockEntry {
    mode: LockMode,
    /// Holding xids with their nesting depth.
    holders: HashMap<u64, usize>,
}

/// Table/index granularity shared-exclusive locks. Waiters poll with a
/// deadline; timing out surfaces as a `LockConflict`, which rolls the
/// transaction back and thereby resolves deadlocks.
pub struct LockManager {
    entries: Mutex<HashMap<LockTarget, LockEntry>>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn acquire_lock(&self, target: &LockTarget, xid: u64, mode: LockMode) -> DbResult<()> {
        debug!("request lock, xid: {}, mode: {:?}, target: {:?}", xid, mode, target);
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.try_acquire(target, xid, mode) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                debug!("lock wait timed out, xid: {}, target: {:?}", xid, target);
                return Err(DbError::LockConflict(format!(
                    "xid {} timed out waiting for {:?} lock on {} {}",
                    xid, mode, target.0, target.1
                )));
            }
            sleep(LOCK_RETRY_INTERVAL);
        }
    }

    fn try_acquire(&self, target: &LockTarget, xid: u64, mode: LockMode) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(target) {
            None => {
                let mut holders = HashMap::new();
                holders.insert(xid, 1);
                entries.insert(target.clone(), LockEntry { mode, holders });
                true
            }
            Some(entry) => {
                if entry.holders.contains_key(&xid) {
                    match (entry.mode, mode) {
                        // an equal or stronger lock is already held
                        (LockMode::Exclusive, _) | (LockMode::Shared, LockMode::Shared) => {
                            *entry.holders.get_mut(&xid).unwrap() += 1;
                            true
                        }
                        (LockMode::Shared, LockMode::Exclusive) => {
                            // upgrade only as the sole holder
                            if entry.holders.len() == 1 {
                                entry.mode = LockMode::Exclusive;
                                *entry.holders.get_mut(&xid).unwrap() += 1;
                                true
                            } else {
                                false
                            }
                        }
                    }
                } else if entry.mode == LockMode::Shared && mode == LockMode::Shared {
                    entry.holders.insert(xid, 1);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Unwinds one acquisition. Releasing a lock the xid does not hold is
    /// ignored.
    pub fn release_lock(&self, target: &LockTarget, xid: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(target) {
            if let Some(depth) = entry.holders.get_mut(&xid) {
                *depth -= 1;
                if *depth == 0 {
                    entry.holders.remove(&xid);
                }
            }
            if entry.holders.is_empty() {
                entries.remove(target);
            }
        }
    }

    /// Drops every lock still held by the transaction; called on commit
    /// and abort.
    pub fn release_all(&self, xid: u64) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|target, entry| {
            if entry.holders.remove(&xid).is_some() {
                debug!("released lock on {:?} held by xid {}", target, xid);
            }
            !entry.holders.is_empty()
        });
    }

    /// Number of live lock entries; tests use this to check operator
    /// hygiene.
    pub fn lock_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn held_by(&self, xid: u64) -> Vec<LockTarget> {
        let entries = self.entries.lock().unwrap();
        let mut targets: Vec<LockTarget> = entries
            .iter()
            .filter(|(_, entry)| entry.holders.contains_key(&xid))
            .map(|(target, _)| target.clone())
            .collect();
        targets.sort();
        targets
    }
}
