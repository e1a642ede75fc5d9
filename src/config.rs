use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_LRU_CAPACITY: usize = 64;
pub const DEFAULT_SORT_CHUNK_SIZE: usize = 2;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 3000;

pub const REDO_LOG_FILENAME: &str = "redo.log";

/// Engine configuration. One instance is owned by [`crate::Database`] and
/// read everywhere else.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Working directory; all persistent state lives below it.
    pub work_dir: PathBuf,
    pub listen_addr: String,
    /// Cleartext password expected from connecting clients.
    pub password: String,
    pub page_size: usize,
    pub lru_capacity: usize,
    /// Chunk size (in tuples) for the external sort.
    pub sort_chunk_size: usize,
    /// Whether ORDER BY plans use the external sort strategy.
    pub sort_external: bool,
    pub lock_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("littledb_data"),
            listen_addr: "127.0.0.1:54321".to_string(),
            password: "abcd".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            lru_capacity: DEFAULT_LRU_CAPACITY,
            sort_chunk_size: DEFAULT_SORT_CHUNK_SIZE,
            sort_external: false,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

impl DbConfig {
    /// Default configuration with `LITTLEDB_DIR`, `LITTLEDB_ADDR` and
    /// `LITTLEDB_PASSWORD` overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = env::var("LITTLEDB_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = env::var("LITTLEDB_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(password) = env::var("LITTLEDB_PASSWORD") {
            config.password = password;
        }
        config
    }

    pub fn with_work_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.work_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.work_dir.join("catalog")
    }

    /// Heap files, one per table.
    pub fn base_dir(&self) -> PathBuf {
        self.work_dir.join("base")
    }

    /// Serialized b+ trees, one per index.
    pub fn index_dir(&self) -> PathBuf {
        self.work_dir.join("index")
    }

    pub fn redo_log_path(&self) -> PathBuf {
        self.work_dir.join(REDO_LOG_FILENAME)
    }

    /// Undo files, one per live transaction.
    pub fn undo_dir(&self) -> PathBuf {
        self.work_dir.join("undo")
    }

    /// Scratch space for the external sort.
    pub fn temp_dir(&self) -> PathBuf {
        self.work_dir.join("temp")
    }
}
