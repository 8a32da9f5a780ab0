pub mod activate;
pub mod alter;
pub mod changes;
pub mod error;
pub mod functions;
pub mod session;

pub use activate::Activation;
pub use changes::{ChangeFilter, SiteFilter};
pub use error::EngineError;
pub use session::{SessionState, SharedSession};

use rusqlite::Connection;

use rusqlite::types::Value;

use crrlite_core::consts::PRE_COMPACT_DBVERSION_KEY;
use crrlite_core::{Change, Changeset, ColumnValue, Lifecycle, SiteId};
use crrlite_storage::schema::load_or_create_site_id;
use crrlite_storage::{ClockStore, CompactionOutcome, SqliteStorage};

use crate::session::lock;

/// Owner of one connection with crr support installed: the session state,
/// the SQL functions and the transaction hooks live and die with it.
pub struct Crr {
    storage: SqliteStorage,
    session: SharedSession,
}

impl Crr {
    pub fn new(storage: SqliteStorage) -> Result<Self, EngineError> {
        let site_id = load_or_create_site_id(storage.conn())?;
        let session = SessionState::shared(site_id);
        functions::register(storage.conn(), &session)?;
        activate::refresh_changes_view(storage.conn(), &session)?;
        tracing::info!(%site_id, "crr connection ready");
        Ok(Self { storage, session })
    }

    pub fn open(path: &str) -> Result<Self, EngineError> {
        Self::new(SqliteStorage::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::new(SqliteStorage::open_in_memory()?)
    }

    pub fn conn(&self) -> &Connection {
        self.storage.conn()
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn site_id(&self) -> Result<SiteId, EngineError> {
        Ok(lock(&self.session)?.site_id())
    }

    pub fn db_version(&self) -> Result<i64, EngineError> {
        Ok(lock(&self.session)?.db_version(self.conn())?)
    }

    pub fn next_db_version(&self) -> Result<i64, EngineError> {
        Ok(lock(&self.session)?.next_db_version(self.conn())?)
    }

    pub fn sync_bit(&self) -> Result<bool, EngineError> {
        Ok(lock(&self.session)?.sync_bit() != 0)
    }

    /// While set, the generated triggers write nothing. Used when replaying
    /// a peer's changes verbatim.
    pub fn set_sync_bit(&self, on: bool) -> Result<(), EngineError> {
        lock(&self.session)?.set_sync_bit(i64::from(on));
        Ok(())
    }

    pub fn as_crr(&self, table: &str) -> Result<Activation, EngineError> {
        self.as_crr_in("main", table)
    }

    /// Atomic: on failure the database is left as it was and the first error
    /// is returned. `schema` may name any attached database but `temp`.
    pub fn as_crr_in(&self, schema: &str, table: &str) -> Result<Activation, EngineError> {
        activate::as_crr(self.conn(), &self.session, schema, table)
    }

    pub fn begin_alter(&self, table: &str) -> Result<(), EngineError> {
        alter::begin_alter(self.conn(), &self.session, table)
    }

    pub fn commit_alter(&self, table: &str) -> Result<CompactionOutcome, EngineError> {
        alter::commit_alter(self.conn(), &self.session, table)
    }

    /// Runs `migrate` between `begin_alter` and `commit_alter`. If `migrate`
    /// fails, the migration is rolled back and its error returned.
    pub fn alter<F>(&self, table: &str, migrate: F) -> Result<CompactionOutcome, EngineError>
    where
        F: FnOnce(&Connection) -> Result<(), EngineError>,
    {
        self.begin_alter(table)?;
        if let Err(e) = migrate(self.conn()) {
            alter::abort_alter(self.conn(), &self.session, table)?;
            return Err(e);
        }
        self.commit_alter(table)
    }

    /// The db_version recorded by the last post-alter compaction, if any.
    /// Peers that synced from below it must resync the altered tables.
    pub fn pre_compact_db_version(&self) -> Result<Option<i64>, EngineError> {
        match self.storage.master_value(PRE_COMPACT_DBVERSION_KEY)? {
            Some(Value::Integer(version)) => Ok(Some(version)),
            Some(other) => Err(EngineError::Storage(crrlite_storage::StorageError::Consistency(
                format!("{PRE_COMPACT_DBVERSION_KEY} is not an integer: {other:?}"),
            ))),
            None => Ok(None),
        }
    }

    pub fn changes(&self, filter: &ChangeFilter) -> Result<Vec<Change>, EngineError> {
        let infos = lock(&self.session)?.ensure_table_infos(self.conn())?.to_vec();
        changes::read_changes(self.conn(), &infos, filter)
    }

    pub fn changeset(&self, filter: &ChangeFilter) -> Result<Changeset, EngineError> {
        Ok(Changeset {
            site_id: self.site_id()?,
            changes: self.changes(filter)?,
        })
    }

    pub fn row_lifecycle(&self, table: &str, pk: &[ColumnValue]) -> Result<Lifecycle, EngineError> {
        Ok(Lifecycle::from_causal_length(
            self.storage.causal_length(table, pk)?,
        ))
    }
}
