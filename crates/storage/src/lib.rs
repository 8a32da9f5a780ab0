pub mod backfill;
pub mod changes;
pub mod clock;
pub mod compact;
pub mod error;
pub mod schema;
pub mod sql;
pub mod sqlite;
pub mod table_info;
pub mod traits;
pub mod triggers;
pub mod value;

pub use changes::ChangeRow;
pub use compact::CompactionOutcome;
pub use error::StorageError;
pub use sqlite::SqliteStorage;
pub use table_info::{ColumnInfo, TableInfo};
pub use traits::*;
