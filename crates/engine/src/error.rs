use crrlite_core::CoreError;
use crrlite_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("session state lock poisoned")]
    SessionPoisoned,

    #[error("no alter in progress for table: {0}")]
    NoAlterInProgress(String),

    #[error("alter already in progress for table: {0}")]
    AlterInProgress(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(e))
    }
}
