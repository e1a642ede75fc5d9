use thiserror::Error;

/// All engine errors fall into two families. Notice errors describe a bad
/// request and leave the current transaction alone; rollback errors abort
/// the transaction and replay its undo log.
#[derive(Error, Debug)]
pub enum DbError {
    // notice family
    #[error("logical plan error: {0}")]
    LogicalPlan(String),
    #[error("executor check error: {0}")]
    ExecutorCheck(String),

    // rollback family
    #[error("page error: {0}")]
    Page(String),
    #[error("lru cache error: {0}")]
    Lru(String),
    #[error("b+ tree error: {0}")]
    BPlusTree(String),
    #[error("lock conflict: {0}")]
    LockConflict(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Whether the query driver must abort the current transaction.
    pub fn is_rollback(&self) -> bool {
        !matches!(self, DbError::LogicalPlan(_) | DbError::ExecutorCheck(_))
    }
}

impl From<Box<bincode::ErrorKind>> for DbError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        DbError::Codec(e.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
