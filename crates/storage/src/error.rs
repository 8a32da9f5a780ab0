use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("table {table} cannot be a crr: {reason}")]
    Ineligible { table: String, reason: String },

    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("core error: {0}")]
    Core(#[from] crrlite_core::CoreError),
}

impl StorageError {
    pub(crate) fn ineligible(table: &str, reason: impl Into<String>) -> Self {
        Self::Ineligible {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}
