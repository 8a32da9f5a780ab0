//! Per-connection versioning state: site identity, the transaction clock,
//! the intra-transaction sequence counter, the sync bit, the alter in
//! progress and a cache of table metadata.
//!
//! The state is shared between the connection owner and the SQL functions
//! and hooks registered on that connection. None of the methods here run
//! statements that call back into those functions, so holding the lock
//! across a query cannot deadlock.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crrlite_core::SiteId;
use crrlite_storage::sqlite::{crr_schemas, fetch_durable_db_version, load_crr_table_infos, schema_counters};
use crrlite_storage::{StorageError, TableInfo};

use crate::error::EngineError;

pub type SharedSession = Arc<Mutex<SessionState>>;

#[derive(Debug)]
pub struct SessionState {
    site_id: SiteId,
    db_version: Option<i64>,
    seq: i64,
    sync_bit: i64,
    /// Crrs of every attached schema except `temp`.
    table_infos: Vec<TableInfo>,
    /// `schema_version` of each schema when `table_infos` was loaded.
    schema_versions: Option<Vec<(String, i64)>>,
    /// `data_version` of each schema when `db_version` was cached. It moves
    /// when another connection commits, which our hooks never see.
    data_versions: Option<Vec<(String, i64)>>,
    pending_alter: Option<String>,
}

impl SessionState {
    pub fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            db_version: None,
            seq: 0,
            sync_bit: 0,
            table_infos: Vec::new(),
            schema_versions: None,
            data_versions: None,
            pending_alter: None,
        }
    }

    pub fn shared(site_id: SiteId) -> SharedSession {
        Arc::new(Mutex::new(Self::new(site_id)))
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    /// Highest durable db_version, computed on first use in a transaction
    /// and cached until it ends.
    pub fn db_version(&mut self, conn: &Connection) -> Result<i64, StorageError> {
        let data_versions = schema_counters(conn, &crr_schemas(conn)?, "data_version")?;
        if let Some(version) = self.db_version {
            if self.data_versions.as_ref() == Some(&data_versions) {
                return Ok(version);
            }
        }
        self.ensure_table_infos(conn)?;
        let version = fetch_durable_db_version(conn, &self.table_infos)?;
        tracing::debug!(db_version = version, "computed db_version for transaction");
        self.db_version = Some(version);
        self.data_versions = Some(data_versions);
        Ok(version)
    }

    /// The value every clock row written in this transaction carries.
    pub fn next_db_version(&mut self, conn: &Connection) -> Result<i64, StorageError> {
        Ok(self.db_version(conn)? + 1)
    }

    /// Returns the current slot, then advances.
    pub fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    pub fn peek_seq(&self) -> i64 {
        self.seq
    }

    pub fn sync_bit(&self) -> i64 {
        self.sync_bit
    }

    pub fn set_sync_bit(&mut self, value: i64) {
        self.sync_bit = value;
    }

    /// Reload every crr's metadata when any schema's `schema_version` has
    /// moved since the last load, or a database was attached or detached.
    pub fn ensure_table_infos(&mut self, conn: &Connection) -> Result<&[TableInfo], StorageError> {
        let schemas = crr_schemas(conn)?;
        let current = schema_counters(conn, &schemas, "schema_version")?;
        if self.schema_versions.as_ref() != Some(&current) {
            let mut infos = Vec::new();
            for schema in &schemas {
                infos.extend(load_crr_table_infos(conn, schema)?);
            }
            self.table_infos = infos;
            self.schema_versions = Some(current);
            tracing::debug!(
                schemas = schemas.len(),
                tables = self.table_infos.len(),
                "reloaded table infos"
            );
        }
        Ok(&self.table_infos)
    }

    /// The first attached schema holding a crr called `table` wins.
    pub fn table_info(&mut self, conn: &Connection, table: &str) -> Result<Option<TableInfo>, StorageError> {
        Ok(self
            .ensure_table_infos(conn)?
            .iter()
            .find(|info| info.table == table)
            .cloned())
    }

    pub fn pending_alter(&self) -> Option<&str> {
        self.pending_alter.as_deref()
    }

    pub fn set_pending_alter(&mut self, table: Option<String>) {
        self.pending_alter = table;
    }

    /// Forget the transaction's db_version and sequence origin.
    pub fn reset_clock(&mut self) {
        self.db_version = None;
        self.seq = 0;
    }

    /// Commit and rollback both land here. The alter savepoint cannot
    /// outlive the transaction it was opened in.
    pub fn on_transaction_end(&mut self) {
        self.reset_clock();
        self.pending_alter = None;
    }

    /// A rolled back schema change can bring `schema_version` back to a
    /// value the cache has already seen with different contents.
    pub fn invalidate_table_infos(&mut self) {
        self.schema_versions = None;
    }
}

pub(crate) fn lock(session: &SharedSession) -> Result<MutexGuard<'_, SessionState>, EngineError> {
    session.lock().map_err(|_| EngineError::SessionPoisoned)
}
