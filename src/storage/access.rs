use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::storage::bplus_tree::BPlusTree;
use crate::storage::pager::PinnedPage;
use crate::storage::tuple::{decode_row, encode_row, IndexKey, Row};
use crate::storage::Location;
use crate::transaction::redo::RedoAction;
use crate::transaction::redo::RedoRecord;
use crate::transaction::undo::{UndoOperation, UndoRecord};
use crate::transaction::Xid;
use crate::utils::HandyRwLock;

/// In-memory cache of loaded b+ trees, one per index. Trees are saved on
/// checkpoint (and on creation); `dirty` tracks which ones have unsaved
/// changes.
pub struct IndexStore {
    dir: PathBuf,
    trees: Mutex<HashMap<String, Arc<RwLock<BPlusTree<Location>>>>>,
    dirty: Mutex<HashSet<String>>,
}

impl IndexStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            trees: Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn get(&self, name: &str) -> DbResult<Arc<RwLock<BPlusTree<Location>>>> {
        let mut trees = self.trees.lock().unwrap();
        if let Some(tree) = trees.get(name) {
            return Ok(Arc::clone(tree));
        }
        let tree = Arc::new(RwLock::new(BPlusTree::load(self.path(name))?));
        trees.insert(name.to_string(), Arc::clone(&tree));
        Ok(tree)
    }

    /// Registers a fresh, empty tree under `name`, replacing any loaded
    /// one.
    pub fn create(&self, name: &str) -> Arc<RwLock<BPlusTree<Location>>> {
        let tree = Arc::new(RwLock::new(BPlusTree::new()));
        self.trees
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&tree));
        tree
    }

    pub fn mark_dirty(&self, name: &str) {
        self.dirty.lock().unwrap().insert(name.to_string());
    }

    pub fn save(&self, name: &str) -> DbResult<()> {
        let tree = self.get(name)?;
        tree.rl().save(self.path(name))?;
        self.dirty.lock().unwrap().remove(name);
        Ok(())
    }

    pub fn flush_all(&self) -> DbResult<()> {
        let dirty: Vec<String> = self.dirty.lock().unwrap().drain().collect();
        for name in dirty {
            let tree = self.get(&name)?;
            tree.rl().save(self.path(&name))?;
        }
        Ok(())
    }

    /// Drops the tree and its file; used when rolling back CREATE INDEX.
    pub fn forget(&self, name: &str) {
        self.trees.lock().unwrap().remove(name);
        let _ = std::fs::remove_file(self.path(name));
        self.dirty.lock().unwrap().remove(name);
    }
}

/// Lazy cursor over a table's tuples in insertion order, skipping
/// tombstones. Holds a pin on the page it is currently walking.
pub struct TableTupleIter {
    db: Arc<Database>,
    table: String,
    page_count: u32,
    next_page: u32,
    next_slot: u16,
    current: Option<PinnedPage>,
    failed: bool,
}

impl TableTupleIter {
    pub(crate) fn new(db: Arc<Database>, table: &str) -> DbResult<Self> {
        let page_count = db.pager().page_count(table)?;
        Ok(Self {
            db,
            table: table.to_string(),
            page_count,
            next_page: 0,
            next_slot: 0,
            current: None,
            failed: false,
        })
    }
}

impl Iterator for TableTupleIter {
    type Item = DbResult<(Location, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.current.is_none() {
                if self.next_page >= self.page_count {
                    return None;
                }
                match self.db.pager().fetch_page(&self.table, self.next_page) {
                    Ok(pinned) => self.current = Some(pinned),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
                self.next_slot = 0;
            }

            let pinned = self.current.as_ref().unwrap();
            let (payload, slot_count) = {
                let page = pinned.page().read().unwrap();
                if (self.next_slot as usize) < page.slot_count() {
                    match page.select(self.next_slot) {
                        Ok(payload) => (Some(payload), page.slot_count()),
                        Err(e) => {
                            self.failed = true;
                            return Some(Err(e));
                        }
                    }
                } else {
                    (None, page.slot_count())
                }
            };

            match payload {
                None => {
                    // page exhausted
                    debug_assert!(self.next_slot as usize >= slot_count);
                    self.current = None;
                    self.next_page += 1;
                }
                Some(payload) => {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    if payload.is_empty() {
                        continue; // tombstone
                    }
                    let location = Location::new(self.next_page, slot);
                    return Some(match decode_row(&payload) {
                        Ok(row) => Ok((location, row)),
                        Err(e) => {
                            self.failed = true;
                            Err(e)
                        }
                    });
                }
            }
        }
    }
}

/// All tuples of a table, in insertion order.
pub fn table_tuple_get_all(
    db: &Arc<Database>,
    table: &str,
) -> DbResult<impl Iterator<Item = DbResult<Row>>> {
    Ok(TableTupleIter::new(Arc::clone(db), table)?.map(|item| item.map(|(_, row)| row)))
}

/// The locations of all live tuples, in insertion order.
pub fn table_tuple_get_all_locations(
    db: &Arc<Database>,
    table: &str,
) -> DbResult<impl Iterator<Item = DbResult<Location>>> {
    Ok(TableTupleIter::new(Arc::clone(db), table)?.map(|item| item.map(|(loc, _)| loc)))
}

impl Database {
    fn dml_xid(&self) -> DbResult<Xid> {
        self.session_xid()
            .ok_or_else(|| DbError::Storage("no transaction bound to this thread".to_string()))
    }

    /// Page-level placement without any logging: last page if it has
    /// room, otherwise a fresh one.
    fn place_tuple(&self, table: &str, payload: &[u8]) -> DbResult<Location> {
        let count = self.pager().page_count(table)?;
        if count > 0 {
            let pinned = self.pager().fetch_page(table, count - 1)?;
            let mut page = pinned.page().wl();
            if page.has_room(payload.len()) {
                let slot = page.insert(payload)?;
                drop(page);
                self.pager().mark_dirty(table, count - 1);
                return Ok(Location::new(count - 1, slot));
            }
        }
        let (page_id, pinned) = self.pager().allocate_page(table)?;
        let slot = pinned.page().wl().insert(payload)?;
        self.pager().mark_dirty(table, page_id);
        Ok(Location::new(page_id, slot))
    }

    fn stamp_page(&self, table: &str, page_id: u32, lsn: u64) -> DbResult<()> {
        let pinned = self.pager().fetch_page(table, page_id)?;
        pinned.page().wl().set_lsn(lsn);
        self.pager().mark_dirty(table, page_id);
        Ok(())
    }

    pub fn table_tuple_get_one(&self, table: &str, location: Location) -> DbResult<Row> {
        let pinned = self.pager().fetch_page(table, location.page_id)?;
        let payload = pinned.page().rl().select(location.slot_id)?;
        if payload.is_empty() {
            return Err(DbError::Storage(format!(
                "tuple at {} of {} is dead",
                location, table
            )));
        }
        decode_row(&payload)
    }

    /// Inserts one tuple, returning its location. The compensating undo
    /// record is durable before the redo record is written.
    pub fn table_tuple_insert_one(&self, table: &str, row: &Row) -> DbResult<Location> {
        let xid = self.dml_xid()?;
        let payload = encode_row(row)?;
        let location = self.place_tuple(table, &payload)?;

        self.tx_mgr.undo.write(&UndoRecord {
            xid,
            op: UndoOperation::TableDelete,
            target: Some(table.to_string()),
            location: Some(location),
            payload: Vec::new(),
        })?;
        let lsn = self.tx_mgr.redo.write(
            xid,
            RedoAction::TableInsert,
            Some(table.to_string()),
            Some(location),
            payload,
        )?;
        self.stamp_page(table, location.page_id, lsn)?;
        debug!("inserted tuple at {} of {}", location, table);
        Ok(location)
    }

    /// Updates the tuple at `location`, returning its (possibly new)
    /// location.
    pub fn table_tuple_update_one(
        &self,
        table: &str,
        location: Location,
        row: &Row,
    ) -> DbResult<Location> {
        let xid = self.dml_xid()?;
        let payload = encode_row(row)?;

        let pinned = self.pager().fetch_page(table, location.page_id)?;
        let old_payload = pinned.page().rl().select(location.slot_id)?;
        if old_payload.is_empty() {
            return Err(DbError::Storage(format!(
                "cannot update dead tuple at {} of {}",
                location, table
            )));
        }

        let same_page = pinned.page().wl().update(location.slot_id, &payload);
        let new_location = match same_page {
            Ok(slot_id) => Location::new(location.page_id, slot_id),
            // the page is full; move the tuple elsewhere
            Err(DbError::Page(_)) => {
                let new_location = self.place_tuple(table, &payload)?;
                pinned.page().wl().delete(location.slot_id)?;
                new_location
            }
            Err(e) => return Err(e),
        };
        self.pager().mark_dirty(table, location.page_id);
        drop(pinned);

        if new_location == location {
            self.tx_mgr.undo.write(&UndoRecord {
                xid,
                op: UndoOperation::TableUpdate,
                target: Some(table.to_string()),
                location: Some(location),
                payload: old_payload,
            })?;
            let lsn = self.tx_mgr.redo.write(
                xid,
                RedoAction::TableUpdate,
                Some(table.to_string()),
                Some(location),
                payload,
            )?;
            self.stamp_page(table, location.page_id, lsn)?;
        } else {
            // a relocating update reverts as delete-new plus restore-old
            self.tx_mgr.undo.write(&UndoRecord {
                xid,
                op: UndoOperation::TableDelete,
                target: Some(table.to_string()),
                location: Some(new_location),
                payload: Vec::new(),
            })?;
            self.tx_mgr.undo.write(&UndoRecord {
                xid,
                op: UndoOperation::TableInsert,
                target: Some(table.to_string()),
                location: Some(location),
                payload: old_payload,
            })?;
            let lsn = self.tx_mgr.redo.write(
                xid,
                RedoAction::TableDelete,
                Some(table.to_string()),
                Some(location),
                Vec::new(),
            )?;
            self.stamp_page(table, location.page_id, lsn)?;
            let lsn = self.tx_mgr.redo.write(
                xid,
                RedoAction::TableInsert,
                Some(table.to_string()),
                Some(new_location),
                payload,
            )?;
            self.stamp_page(table, new_location.page_id, lsn)?;
        }
        debug!(
            "updated tuple {} -> {} of {}",
            location, new_location, table
        );
        Ok(new_location)
    }

    pub fn table_tuple_delete_multiple(
        &self,
        table: &str,
        locations: &[Location],
    ) -> DbResult<()> {
        let xid = self.dml_xid()?;
        for location in locations {
            let pinned = self.pager().fetch_page(table, location.page_id)?;
            let old_payload = pinned.page().rl().select(location.slot_id)?;
            if old_payload.is_empty() {
                continue;
            }
            self.tx_mgr.undo.write(&UndoRecord {
                xid,
                op: UndoOperation::TableInsert,
                target: Some(table.to_string()),
                location: Some(*location),
                payload: old_payload,
            })?;
            let lsn = self.tx_mgr.redo.write(
                xid,
                RedoAction::TableDelete,
                Some(table.to_string()),
                Some(*location),
                Vec::new(),
            )?;
            {
                let mut page = pinned.page().wl();
                page.delete(location.slot_id)?;
                page.set_lsn(lsn);
            }
            self.pager().mark_dirty(table, location.page_id);
        }
        Ok(())
    }

    fn scan_table(
        &self,
        table: &str,
        mut visit: impl FnMut(Location, Row) -> DbResult<()>,
    ) -> DbResult<()> {
        let page_count = self.pager().page_count(table)?;
        for page_id in 0..page_count {
            let pinned = self.pager().fetch_page(table, page_id)?;
            let slot_count = pinned.page().rl().slot_count() as u16;
            for slot_id in 0..slot_count {
                let payload = pinned.page().rl().select(slot_id)?;
                if payload.is_empty() {
                    continue;
                }
                visit(Location::new(page_id, slot_id), decode_row(&payload)?)?;
            }
        }
        Ok(())
    }

    /// Builds a fresh b+ tree for the index by scanning its table, and
    /// persists it.
    pub fn index_tuple_create(
        &self,
        index_name: &str,
        table_name: &str,
        columns: &[String],
    ) -> DbResult<()> {
        let column_ids: Vec<usize> = {
            let catalog = self.catalog();
            let form = catalog.table(table_name)?;
            columns
                .iter()
                .map(|c| {
                    form.column_index(c).ok_or_else(|| {
                        DbError::LogicalPlan(format!(
                            "no column {} in table {}",
                            c, table_name
                        ))
                    })
                })
                .collect::<DbResult<_>>()?
        };

        let tree = self.index_store().create(index_name);
        {
            let mut tree = tree.wl();
            self.scan_table(table_name, |location, row| {
                let key: IndexKey = column_ids.iter().map(|i| row[*i].clone()).collect();
                tree.insert(key, location);
                Ok(())
            })?;
        }
        self.index_store().save(index_name)?;
        debug!("built index {} on {}({:?})", index_name, table_name, columns);
        Ok(())
    }

    pub fn index_tuple_insert_one(
        &self,
        index_name: &str,
        key: &IndexKey,
        value: Location,
    ) -> DbResult<()> {
        let xid = self.dml_xid()?;
        let key_bytes = bincode::serialize(key)?;
        self.tx_mgr.undo.write(&UndoRecord {
            xid,
            op: UndoOperation::IndexDelete,
            target: Some(index_name.to_string()),
            location: Some(value),
            payload: key_bytes.clone(),
        })?;
        self.tx_mgr.redo.write(
            xid,
            RedoAction::IndexInsert,
            Some(index_name.to_string()),
            Some(value),
            key_bytes,
        )?;
        self.index_store().get(index_name)?.wl().insert(key.clone(), value);
        self.index_store().mark_dirty(index_name);
        Ok(())
    }

    pub fn index_tuple_delete_one(
        &self,
        index_name: &str,
        key: &IndexKey,
        location: Location,
    ) -> DbResult<()> {
        let xid = self.dml_xid()?;
        let key_bytes = bincode::serialize(key)?;
        self.tx_mgr.undo.write(&UndoRecord {
            xid,
            op: UndoOperation::IndexInsert,
            target: Some(index_name.to_string()),
            location: Some(location),
            payload: key_bytes.clone(),
        })?;
        self.tx_mgr.redo.write(
            xid,
            RedoAction::IndexDelete,
            Some(index_name.to_string()),
            Some(location),
            key_bytes,
        )?;
        self.index_store()
            .get(index_name)?
            .wl()
            .delete_entry(key, &location);
        self.index_store().mark_dirty(index_name);
        Ok(())
    }

    /// Repoints the index at a tuple that moved from `old_value` to
    /// `value`. The entry's previous key is unknown to the caller (the
    /// update may have changed the indexed column), so every entry
    /// holding the old location is replaced.
    pub fn index_tuple_update_one(
        &self,
        index_name: &str,
        key: &IndexKey,
        old_value: Location,
        value: Location,
    ) -> DbResult<()> {
        let xid = self.dml_xid()?;
        let tree = self.index_store().get(index_name)?;
        let removed = tree.wl().remove_by_value(&old_value);

        // undo records replay in reverse: the new entry must be deleted
        // before the removed pairs come back, or an in-place update
        // (same key, same location) would delete its own restoration
        for (old_key, old_location) in &removed {
            self.tx_mgr.undo.write(&UndoRecord {
                xid,
                op: UndoOperation::IndexInsert,
                target: Some(index_name.to_string()),
                location: Some(*old_location),
                payload: bincode::serialize(old_key)?,
            })?;
        }
        self.tx_mgr.undo.write(&UndoRecord {
            xid,
            op: UndoOperation::IndexDelete,
            target: Some(index_name.to_string()),
            location: Some(value),
            payload: bincode::serialize(key)?,
        })?;
        self.tx_mgr.redo.write(
            xid,
            RedoAction::IndexUpdate,
            Some(index_name.to_string()),
            None,
            bincode::serialize(&(key, old_value, value))?,
        )?;

        tree.wl().insert(key.clone(), value);
        self.index_store().mark_dirty(index_name);
        Ok(())
    }

    /// Locations stored under exactly `key`, duplicates included.
    pub fn index_tuple_get_equal_value_locations(
        &self,
        index_name: &str,
        key: &IndexKey,
    ) -> DbResult<Vec<Location>> {
        Ok(self.index_store().get(index_name)?.rl().find(key))
    }

    pub fn index_tuple_get_range_locations(
        &self,
        index_name: &str,
        start: Option<&IndexKey>,
        end: Option<&IndexKey>,
    ) -> DbResult<Vec<Location>> {
        Ok(self
            .index_store()
            .get(index_name)?
            .rl()
            .find_range(start, end))
    }

    /// Covered lookups return the keys themselves; no table access.
    pub fn covered_index_tuple_get_equal_value(
        &self,
        index_name: &str,
        key: &IndexKey,
    ) -> DbResult<Vec<IndexKey>> {
        Ok(self
            .index_store()
            .get(index_name)?
            .rl()
            .find_range_entries(Some(key), None)
            .into_iter()
            .take_while(|(k, _)| k == key)
            .map(|(k, _)| k)
            .collect())
    }

    pub fn covered_index_tuple_get_range(
        &self,
        index_name: &str,
        start: Option<&IndexKey>,
        end: Option<&IndexKey>,
    ) -> DbResult<Vec<IndexKey>> {
        Ok(self
            .index_store()
            .get(index_name)?
            .rl()
            .find_range_entries(start, end)
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    fn fetch_or_grow_page(&self, table: &str, page_id: u32) -> DbResult<PinnedPage> {
        while self.pager().page_count(table)? <= page_id {
            let (_, _pinned) = self.pager().allocate_page(table)?;
        }
        self.pager().fetch_page(table, page_id)
    }

    /// Re-applies one redo record during recovery. Table records are
    /// gated on the page LSN so replaying any number of times converges;
    /// index records are applied as delete-then-insert, which is
    /// idempotent because `(key, location)` pairs are unique.
    pub(crate) fn apply_redo_record(&self, record: &RedoRecord) -> DbResult<()> {
        match record.action {
            RedoAction::TableInsert | RedoAction::TableUpdate => {
                let table = record.target.as_deref().unwrap_or_default();
                let location = record
                    .location
                    .ok_or_else(|| DbError::Storage("redo record lacks location".to_string()))?;
                let pinned = self.fetch_or_grow_page(table, location.page_id)?;
                let mut page = pinned.page().wl();
                if page.lsn() < record.lsn {
                    page.restore_slot(location.slot_id, &record.payload)?;
                    page.set_lsn(record.lsn);
                    drop(page);
                    self.pager().mark_dirty(table, location.page_id);
                }
            }
            RedoAction::TableDelete => {
                let table = record.target.as_deref().unwrap_or_default();
                let location = record
                    .location
                    .ok_or_else(|| DbError::Storage("redo record lacks location".to_string()))?;
                let pinned = self.fetch_or_grow_page(table, location.page_id)?;
                let mut page = pinned.page().wl();
                if page.lsn() < record.lsn {
                    if (location.slot_id as usize) < page.slot_count() {
                        page.delete(location.slot_id)?;
                    }
                    page.set_lsn(record.lsn);
                    drop(page);
                    self.pager().mark_dirty(table, location.page_id);
                }
            }
            RedoAction::IndexInsert => {
                let index = record.target.as_deref().unwrap_or_default();
                let key: IndexKey = bincode::deserialize(&record.payload)?;
                let location = record
                    .location
                    .ok_or_else(|| DbError::Storage("redo record lacks location".to_string()))?;
                if let Ok(tree) = self.index_store().get(index) {
                    let mut tree = tree.wl();
                    tree.delete_entry(&key, &location);
                    tree.insert(key, location);
                    drop(tree);
                    self.index_store().mark_dirty(index);
                }
            }
            RedoAction::IndexDelete => {
                let index = record.target.as_deref().unwrap_or_default();
                let key: IndexKey = bincode::deserialize(&record.payload)?;
                let location = record
                    .location
                    .ok_or_else(|| DbError::Storage("redo record lacks location".to_string()))?;
                if let Ok(tree) = self.index_store().get(index) {
                    tree.wl().delete_entry(&key, &location);
                    self.index_store().mark_dirty(index);
                }
            }
            RedoAction::IndexUpdate => {
                let index = record.target.as_deref().unwrap_or_default();
                let (key, old_value, value): (IndexKey, Location, Location) =
                    bincode::deserialize(&record.payload)?;
                if let Ok(tree) = self.index_store().get(index) {
                    let mut tree = tree.wl();
                    tree.remove_by_value(&old_value);
                    tree.delete_entry(&key, &value);
                    tree.insert(key, value);
                    drop(tree);
                    self.index_store().mark_dirty(index);
                }
            }
            RedoAction::Begin
            | RedoAction::Commit
            | RedoAction::Abort
            | RedoAction::Checkpoint => {}
        }
        Ok(())
    }

    /// Applies one compensating record. Used by runtime abort and by
    /// recovery rollback; tolerant of state that never reached disk.
    pub(crate) fn apply_undo_record(&self, record: &UndoRecord) -> DbResult<()> {
        match record.op {
            UndoOperation::TableDelete => {
                let table = record.target.as_deref().unwrap_or_default();
                let location = record
                    .location
                    .ok_or_else(|| DbError::Storage("undo record lacks location".to_string()))?;
                if self.pager().page_count(table)? <= location.page_id {
                    return Ok(());
                }
                let pinned = self.pager().fetch_page(table, location.page_id)?;
                let mut page = pinned.page().wl();
                if (location.slot_id as usize) < page.slot_count() {
                    page.delete(location.slot_id)?;
                    drop(page);
                    self.pager().mark_dirty(table, location.page_id);
                }
            }
            UndoOperation::TableInsert | UndoOperation::TableUpdate => {
                let table = record.target.as_deref().unwrap_or_default();
                let location = record
                    .location
                    .ok_or_else(|| DbError::Storage("undo record lacks location".to_string()))?;
                let pinned = self.fetch_or_grow_page(table, location.page_id)?;
                pinned
                    .page()
                    .wl()
                    .restore_slot(location.slot_id, &record.payload)?;
                drop(pinned);
                self.pager().mark_dirty(table, location.page_id);
            }
            UndoOperation::IndexInsert => {
                let index = record.target.as_deref().unwrap_or_default();
                let key: IndexKey = bincode::deserialize(&record.payload)?;
                let location = record
                    .location
                    .ok_or_else(|| DbError::Storage("undo record lacks location".to_string()))?;
                if let Ok(tree) = self.index_store().get(index) {
                    let mut tree = tree.wl();
                    tree.delete_entry(&key, &location);
                    tree.insert(key, location);
                    drop(tree);
                    self.index_store().mark_dirty(index);
                }
            }
            UndoOperation::IndexDelete => {
                let index = record.target.as_deref().unwrap_or_default();
                let key: IndexKey = bincode::deserialize(&record.payload)?;
                let location = record
                    .location
                    .ok_or_else(|| DbError::Storage("undo record lacks location".to_string()))?;
                if let Ok(tree) = self.index_store().get(index) {
                    tree.wl().delete_entry(&key, &location);
                    self.index_store().mark_dirty(index);
                }
            }
            UndoOperation::Begin | UndoOperation::Commit | UndoOperation::Abort => {}
        }
        Ok(())
    }
}
