use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::DbResult;
use crate::storage::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedoAction {
    Begin,
    TableInsert,
    TableUpdate,
    TableDelete,
    IndexInsert,
    IndexUpdate,
    IndexDelete,
    Commit,
    Abort,
    Checkpoint,
}

/// One redo record. Records are appended in occurrence order; the LSN is
/// allocated at write time and stamped onto the touched page so replay
/// can skip already-applied changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedoRecord {
    pub lsn: u64,
    pub xid: u64,
    pub action: RedoAction,
    pub target: Option<String>,
    pub location: Option<Location>,
    pub payload: Vec<u8>,
}

/// The single append-only redo file. Each record is framed as a little
/// endian u32 length followed by its bincode body.
pub struct RedoLogManager {
    path: PathBuf,
    file: Mutex<File>,
    next_lsn: AtomicU64,
}

impl RedoLogManager {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;
        let manager = Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(file),
            next_lsn: AtomicU64::new(1),
        };
        // continue the LSN sequence across restarts
        let max_lsn = manager.replay()?.iter().map(|r| r.lsn).max().unwrap_or(0);
        manager.next_lsn.store(max_lsn + 1, Ordering::SeqCst);
        Ok(manager)
    }

    pub fn next_lsn(&self) -> u64 {
        self.next_lsn.load(Ordering::SeqCst)
    }

    /// Appends a record, assigning it the next LSN, which is returned so
    /// the caller can stamp the modified page.
    pub fn write(
        &self,
        xid: u64,
        action: RedoAction,
        target: Option<String>,
        location: Option<Location>,
        payload: Vec<u8>,
    ) -> DbResult<u64> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let record = RedoRecord {
            lsn,
            xid,
            action,
            target,
            location,
            payload,
        };
        let body = bincode::serialize(&record)?;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&(body.len() as u32).to_le_bytes())?;
        file.write_all(&body)?;
        debug!("redo: {:?} xid {} lsn {}", record.action, xid, lsn);
        Ok(lsn)
    }

    /// Forces the log to stable storage; called on commit and checkpoint.
    pub fn flush(&self) -> DbResult<()> {
        self.file.lock().unwrap().sync_data()?;
        Ok(())
    }

    /// Reads every record currently in the log, in written order.
    pub fn replay(&self) -> DbResult<Vec<RedoRecord>> {
        let mut file = self.file.lock().unwrap();
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
                // torn tail write; everything before it is still valid
                break;
            }
            match bincode::deserialize(&bytes[at..at + len]) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
            at += len;
        }
        Ok(records)
    }

    /// Discards all records. Invoked by checkpoint once every dirty page
    /// is safely on disk; the LSN sequence keeps counting.
    pub fn reset(&self) -> DbResult<()> {
        let mut file = self.file.lock().unwrap();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redo_write_flush_replay() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RedoLogManager::open(dir.path().join("redo.log")).unwrap();

        manager
            .write(0, RedoAction::Begin, None, None, Vec::new())
            .unwrap();
        manager
            .write(1, RedoAction::Begin, None, None, Vec::new())
            .unwrap();
        manager
            .write(
                0,
                RedoAction::TableInsert,
                Some("t1".to_string()),
                Some(Location::new(0, 1)),
                b"hello".to_vec(),
            )
            .unwrap();
        manager
            .write(
                1,
                RedoAction::TableUpdate,
                Some("t1".to_string()),
                Some(Location::new(0, 1)),
                b"foo".to_vec(),
            )
            .unwrap();
        manager
            .write(
                0,
                RedoAction::TableInsert,
                Some("t1".to_string()),
                Some(Location::new(0, 2)),
                b"hello".to_vec(),
            )
            .unwrap();
        manager
            .write(0, RedoAction::Commit, None, None, Vec::new())
            .unwrap();
        manager
            .write(1, RedoAction::Commit, None, None, Vec::new())
            .unwrap();

        manager.flush().unwrap();

        let records = manager.replay().unwrap();
        let summary: Vec<(u64, RedoAction)> =
            records.iter().map(|r| (r.xid, r.action)).collect();
        assert_eq!(
            summary,
            vec![
                (0, RedoAction::Begin),
                (1, RedoAction::Begin),
                (0, RedoAction::TableInsert),
                (1, RedoAction::TableUpdate),
                (0, RedoAction::TableInsert),
                (0, RedoAction::Commit),
                (1, RedoAction::Commit),
            ]
        );
        // replay is repeatable
        assert_eq!(manager.replay().unwrap().len(), 7);

        // lsn continues after reopen
        let next = manager.next_lsn();
        drop(manager);
        let manager2 = RedoLogManager::open(dir.path().join("redo.log")).unwrap();
        assert_eq!(manager2.next_lsn(), next);
    }

    #[test]
    fn test_reset_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RedoLogManager::open(dir.path().join("redo.log")).unwrap();
        manager
            .write(0, RedoAction::Begin, None, None, Vec::new())
            .unwrap();
        let lsn_before = manager.next_lsn();
        manager.reset().unwrap();
        assert!(manager.replay().unwrap().is_empty());
        assert!(manager.next_lsn() >= lsn_before);
    }
}
