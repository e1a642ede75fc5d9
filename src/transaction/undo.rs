use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::storage::Location;

/// Compensating operations plus transaction lifecycle markers. The
/// operation names what must be *done* to revert: the undo of an insert
/// is a `TableDelete`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndoOperation {
    Begin,
    TableInsert,
    TableDelete,
    TableUpdate,
    Commit,
    Abort,
    IndexInsert,
    IndexDelete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoRecord {
    pub xid: u64,
    pub op: UndoOperation,
    pub target: Option<String>,
    pub location: Option<Location>,
    /// Prior tuple payload for table ops, serialized index key for index
    /// ops.
    pub payload: Vec<u8>,
}

impl UndoRecord {
    pub fn marker(xid: u64, op: UndoOperation) -> Self {
        Self {
            xid,
            op,
            target: None,
            location: None,
            payload: Vec::new(),
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(
            self.op,
            UndoOperation::Begin | UndoOperation::Commit | UndoOperation::Abort
        )
    }
}

/// One undo file per live transaction. Records are written (and synced)
/// before the corresponding forward action becomes visible, so an abort
/// or a crash can always roll back. Completed files linger until a
/// checkpoint sweeps them.
pub struct UndoLogManager {
    dir: PathBuf,
}

impl UndoLogManager {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn xid_path(&self, xid: u64) -> PathBuf {
        self.dir.join(xid.to_string())
    }

    pub fn start_transaction(&self, xid: u64) -> DbResult<()> {
        fs::create_dir_all(&self.dir)?;
        // a leftover file from a recycled xid would corrupt rollback
        let _ = fs::remove_file(self.xid_path(xid));
        self.write(&UndoRecord::marker(xid, UndoOperation::Begin))
    }

    pub fn write(&self, record: &UndoRecord) -> DbResult<()> {
        let body = bincode::serialize(record)?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.xid_path(record.xid))?;
        file.write_all(&(body.len() as u32).to_le_bytes())?;
        file.write_all(&body)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn commit_transaction(&self, xid: u64) -> DbResult<()> {
        self.write(&UndoRecord::marker(xid, UndoOperation::Commit))
    }

    pub fn abort_transaction(&self, xid: u64) -> DbResult<()> {
        self.write(&UndoRecord::marker(xid, UndoOperation::Abort))
    }

    /// Records of one transaction in reverse write order, ready to be
    /// applied as compensation.
    pub fn parse_records(&self, xid: u64) -> DbResult<Vec<UndoRecord>> {
        let path = self.xid_path(xid);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut records = Vec::new();
        let mut at = 0usize;
        while at + 4 <= bytes.len() {
            let mut lenbuf = [0u8; 4];
            lenbuf.copy_from_slice(&bytes[at..at + 4]);
            let len = u32::from_le_bytes(lenbuf) as usize;
            at += 4;
            if at + len > bytes.len() {
                break;
            }
            match bincode::deserialize(&bytes[at..at + len]) {
                Ok(record) => records.push(record),
                Err(e) => return Err(DbError::Storage(format!("bad undo record: {}", e))),
            }
            at += len;
        }
        records.reverse();
        Ok(records)
    }

    pub fn remove(&self, xid: u64) -> DbResult<()> {
        let _ = fs::remove_file(self.xid_path(xid));
        Ok(())
    }

    fn list_xids(&self) -> DbResult<Vec<u64>> {
        let mut xids = Vec::new();
        if !self.dir.exists() {
            return Ok(xids);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(xid) = name.parse::<u64>() {
                    xids.push(xid);
                }
            }
        }
        xids.sort_unstable();
        Ok(xids)
    }

    fn is_completed(&self, xid: u64) -> DbResult<bool> {
        let records = self.parse_records(xid)?;
        Ok(matches!(
            records.first().map(|r| r.op),
            Some(UndoOperation::Commit) | Some(UndoOperation::Abort)
        ))
    }

    /// Transactions that began but never committed nor aborted; recovery
    /// rolls these back.
    pub fn unresolved_xids(&self) -> DbResult<Vec<u64>> {
        let mut unresolved = Vec::new();
        for xid in self.list_xids()? {
            if !self.is_completed(xid)? {
                unresolved.push(xid);
            }
        }
        Ok(unresolved)
    }

    /// Drops the undo files of completed transactions; called by
    /// checkpoint.
    pub fn remove_completed(&self) -> DbResult<()> {
        for xid in self.list_xids()? {
            if self.is_completed(xid)? {
                debug!("removing undo file of completed xid {}", xid);
                self.remove(xid)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UndoLogManager::new(dir.path().join("undo"));

        manager.start_transaction(0).unwrap();
        manager
            .write(&UndoRecord {
                xid: 0,
                op: UndoOperation::TableDelete,
                target: Some("t1".to_string()),
                location: Some(Location::new(0, 1)),
                payload: b"hello".to_vec(),
            })
            .unwrap();
        manager.start_transaction(1).unwrap();
        manager
            .write(&UndoRecord {
                xid: 0,
                op: UndoOperation::IndexInsert,
                target: Some("t1".to_string()),
                location: Some(Location::new(0, 1)),
                payload: b"hello".to_vec(),
            })
            .unwrap();
        manager.commit_transaction(0).unwrap();
        manager.abort_transaction(1).unwrap();

        let ops: Vec<UndoOperation> = manager
            .parse_records(0)
            .unwrap()
            .iter()
            .map(|r| r.op)
            .collect();
        assert_eq!(
            ops,
            vec![
                UndoOperation::Commit,
                UndoOperation::IndexInsert,
                UndoOperation::TableDelete,
                UndoOperation::Begin,
            ]
        );
        let ops: Vec<UndoOperation> = manager
            .parse_records(1)
            .unwrap()
            .iter()
            .map(|r| r.op)
            .collect();
        assert_eq!(ops, vec![UndoOperation::Abort, UndoOperation::Begin]);
    }

    #[test]
    fn test_unresolved_and_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UndoLogManager::new(dir.path().join("undo"));

        manager.start_transaction(7).unwrap();
        manager.start_transaction(8).unwrap();
        manager.commit_transaction(7).unwrap();

        assert_eq!(manager.unresolved_xids().unwrap(), vec![8]);

        manager.remove_completed().unwrap();
        assert!(manager.parse_records(7).unwrap().is_empty());
        assert!(!manager.parse_records(8).unwrap().is_empty());
    }
}
