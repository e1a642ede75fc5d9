use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::lru::LruCache;
use crate::storage::page::Page;

/// Cache key: table name and page number within the table file.
pub type PageKey = (String, u32);

/// A page checked out of the buffer cache. The entry stays pinned (and
/// therefore resident) until this handle is dropped.
pub struct PinnedPage {
    cache: Arc<Mutex<LruCache<PageKey, Arc<RwLock<Page>>>>>,
    key: PageKey,
    page: Arc<RwLock<Page>>,
}

impl PinnedPage {
    pub fn page(&self) -> &Arc<RwLock<Page>> {
        &self.page
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.unpin(&self.key);
    }
}

/// Page-level I/O over per-table heap files, fronted by the shared LRU
/// buffer. Dirty pages are written back on eviction and on `flush_all`;
/// every write to disk is fsynced.
pub struct Pager {
    base_dir: PathBuf,
    page_size: usize,
    cache: Arc<Mutex<LruCache<PageKey, Arc<RwLock<Page>>>>>,
    dirty: Mutex<HashSet<PageKey>>,
    page_counts: Mutex<HashMap<String, u32>>,
}

impl Pager {
    pub fn new<P: AsRef<Path>>(base_dir: P, page_size: usize, lru_capacity: usize) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            page_size,
            cache: Arc::new(Mutex::new(LruCache::new(lru_capacity))),
            dirty: Mutex::new(HashSet::new()),
            page_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.base_dir.join(table)
    }

    pub fn page_count(&self, table: &str) -> DbResult<u32> {
        let mut counts = self.page_counts.lock().unwrap();
        if let Some(count) = counts.get(table) {
            return Ok(*count);
        }
        let count = match std::fs::metadata(self.table_path(table)) {
            Ok(meta) => (meta.len() / self.page_size as u64) as u32,
            Err(_) => 0,
        };
        counts.insert(table.to_string(), count);
        Ok(count)
    }

    pub fn fetch_page(&self, table: &str, page_id: u32) -> DbResult<PinnedPage> {
        let key: PageKey = (table.to_string(), page_id);
        let mut cache = self.cache.lock().unwrap();
        if let Some(page) = cache.get(&key) {
            cache.pin(&key)?;
            return Ok(PinnedPage {
                cache: Arc::clone(&self.cache),
                key,
                page,
            });
        }

        let page = Arc::new(RwLock::new(self.read_page_from_disk(table, page_id)?));
        if let Some((evicted_key, evicted_page)) = cache.put(key.clone(), Arc::clone(&page))? {
            self.write_back_evicted(&evicted_key, &evicted_page)?;
        }
        cache.pin(&key)?;
        Ok(PinnedPage {
            cache: Arc::clone(&self.cache),
            key,
            page,
        })
    }

    /// Appends a fresh page to the table and hands it out pinned.
    pub fn allocate_page(&self, table: &str) -> DbResult<(u32, PinnedPage)> {
        let page_id = self.page_count(table)?;
        let key: PageKey = (table.to_string(), page_id);
        let page = Arc::new(RwLock::new(Page::new(self.page_size)));

        let mut cache = self.cache.lock().unwrap();
        if let Some((evicted_key, evicted_page)) = cache.put(key.clone(), Arc::clone(&page))? {
            self.write_back_evicted(&evicted_key, &evicted_page)?;
        }
        cache.pin(&key)?;
        drop(cache);

        self.page_counts
            .lock()
            .unwrap()
            .insert(table.to_string(), page_id + 1);
        self.mark_dirty(table, page_id);
        debug!("allocated page {} for table {}", page_id, table);
        Ok((
            page_id,
            PinnedPage {
                cache: Arc::clone(&self.cache),
                key,
                page,
            },
        ))
    }

    pub fn mark_dirty(&self, table: &str, page_id: u32) {
        self.dirty
            .lock()
            .unwrap()
            .insert((table.to_string(), page_id));
    }

    fn read_page_from_disk(&self, table: &str, page_id: u32) -> DbResult<Page> {
        let path = self.table_path(table);
        let mut file = OpenOptions::new().read(true).open(&path).map_err(|e| {
            DbError::Storage(format!("cannot open table file {:?}: {}", path, e))
        })?;
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        let mut buf = vec![0u8; self.page_size];
        file.read_exact(&mut buf).map_err(|e| {
            DbError::Storage(format!("short read of page {} in {}: {}", page_id, table, e))
        })?;
        Page::deserialize(&buf)
    }

    fn write_page_to_disk(&self, table: &str, page_id: u32, page: &Page) -> DbResult<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.table_path(table))?;
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        file.write_all(&page.serialize())?;
        file.sync_all()?;
        Ok(())
    }

    fn write_back_evicted(
        &self,
        key: &PageKey,
        page: &Arc<RwLock<Page>>,
    ) -> DbResult<()> {
        let is_dirty = self.dirty.lock().unwrap().remove(key);
        if is_dirty {
            debug!("writing back evicted page {}/{}", key.0, key.1);
            self.write_page_to_disk(&key.0, key.1, &page.read().unwrap())?;
        }
        Ok(())
    }

    /// Flushes every dirty page still in the cache. Used by checkpoint
    /// and clean shutdown.
    pub fn flush_all(&self) -> DbResult<()> {
        let dirty: Vec<PageKey> = {
            let mut set = self.dirty.lock().unwrap();
            set.drain().collect()
        };
        let cache = Arc::clone(&self.cache);
        for key in dirty {
            let page = {
                let mut cache = cache.lock().unwrap();
                cache.get(&key)
            };
            if let Some(page) = page {
                self.write_page_to_disk(&key.0, key.1, &page.read().unwrap())?;
            }
        }
        Ok(())
    }

    /// The buffer's recently-evicted log, exposed for observability.
    pub fn evicted_pages(&self) -> Vec<PageKey> {
        let cache = self.cache.lock().unwrap();
        cache.evicted().keys().cloned().collect()
    }
}
