use rusqlite::types::Value;

use crrlite_core::{ColumnValue, SiteId};

use crate::error::StorageError;
use crate::table_info::TableInfo;

/// One row of a clock table with its primary key unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockEntry {
    pub pk: Vec<ColumnValue>,
    pub col_name: String,
    pub col_version: i64,
    pub db_version: i64,
    pub seq: i64,
    pub site_id: Option<SiteId>,
}

/// Read side of the versioning metadata.
pub trait ClockStore {
    fn crr_tables(&self) -> Result<Vec<TableInfo>, StorageError>;

    fn durable_db_version(&self) -> Result<i64, StorageError>;

    /// Ordered by (db_version, seq).
    fn clock_entries(&self, table: &str) -> Result<Vec<ClockEntry>, StorageError>;

    fn causal_length(&self, table: &str, pk: &[ColumnValue]) -> Result<Option<i64>, StorageError>;

    fn master_value(&self, key: &str) -> Result<Option<Value>, StorageError>;
}
