use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::info;

use crate::catalog::Catalog;
use crate::config::DbConfig;
use crate::error::DbResult;
use crate::storage::access::IndexStore;
use crate::storage::pager::Pager;
use crate::transaction::lock::LockManager;
use crate::transaction::TransactionManager;
use crate::utils::HandyRwLock;

/// The database instance: configuration, catalog, buffer/pager, index
/// store, lock manager and transaction manager. One `Arc<Database>` is
/// created at startup and passed into planner and operators; there is no
/// process-wide singleton.
pub struct Database {
    config: DbConfig,
    catalog: RwLock<Catalog>,
    pager: Pager,
    indexes: IndexStore,
    lock_manager: LockManager,
    pub(crate) tx_mgr: TransactionManager,
    /// Transactions started since process start, reported by
    /// `SHOW variables`.
    pub(crate) transaction_count: AtomicU64,
}

impl Database {
    /// Opens (or creates) the database under `config.work_dir`, loads the
    /// catalog and runs crash recovery.
    pub fn open(config: DbConfig) -> DbResult<Arc<Database>> {
        std::fs::create_dir_all(&config.work_dir)?;
        std::fs::create_dir_all(config.catalog_dir())?;
        std::fs::create_dir_all(config.base_dir())?;
        std::fs::create_dir_all(config.index_dir())?;
        std::fs::create_dir_all(config.undo_dir())?;
        std::fs::create_dir_all(config.temp_dir())?;

        let mut catalog = Catalog::new(config.catalog_dir());
        catalog.init()?;

        let pager = Pager::new(config.base_dir(), config.page_size, config.lru_capacity);
        let indexes = IndexStore::new(config.index_dir());
        let lock_manager = LockManager::new(config.lock_timeout);
        let tx_mgr = TransactionManager::open(&config)?;

        let db = Arc::new(Database {
            config,
            catalog: RwLock::new(catalog),
            pager,
            indexes,
            lock_manager,
            tx_mgr,
            transaction_count: AtomicU64::new(0),
        });

        db.recovery()?;
        info!("database ready at {:?}", db.config.work_dir);
        Ok(db)
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.rl()
    }

    pub fn mut_catalog(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.wl()
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub(crate) fn index_store(&self) -> &IndexStore {
        &self.indexes
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn transaction_count(&self) -> u64 {
        self.transaction_count.load(Ordering::Relaxed)
    }
}
