use rusqlite::types::Value;

use crrlite_core::consts::{CAUSAL_LENGTH_SENTINEL, PKS_ONLY_SENTINEL};
use crrlite_core::{Change, Changeset, Lifecycle};
use crrlite_engine::{ChangeFilter, EngineError};
use crrlite_storage::sql::{binding_list, identifier_list, qualified, quote_ident, quote_literal};
use crrlite_storage::value::to_value;
use crrlite_storage::TableInfo;

use crate::TestPeer;

/// A handful of in-memory peers with naive verbatim replay between them.
///
/// Replay writes the sender's values and clock rows with the sync bit set
/// and does no conflict resolution: the last change applied wins.
pub struct TestNetwork {
    peers: Vec<TestPeer>,
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetwork {
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    pub fn add_peer(&mut self) -> Result<usize, EngineError> {
        let peer = TestPeer::new()?;
        let index = self.peers.len();
        self.peers.push(peer);
        Ok(index)
    }

    pub fn peer(&self, index: usize) -> &TestPeer {
        &self.peers[index]
    }

    /// Ship everything `to` has not seen from itself, decoded from the
    /// msgpack wire form. Returns the number of changes applied.
    pub fn sync(&self, from: usize, to: usize) -> Result<usize, Box<dyn std::error::Error>> {
        let receiver = &self.peers[to];
        let filter = ChangeFilter::for_peer(receiver.site_id()?, 0);
        let bytes = self.peers[from].crr.changeset(&filter)?.to_msgpack()?;
        let changeset = Changeset::from_msgpack(&bytes)?;
        replay(receiver, &changeset)
    }
}

pub fn replay(peer: &TestPeer, changeset: &Changeset) -> Result<usize, Box<dyn std::error::Error>> {
    peer.crr.set_sync_bit(true)?;
    let result = apply_all(peer, changeset);
    peer.crr.set_sync_bit(false)?;
    result
}

fn apply_all(peer: &TestPeer, changeset: &Changeset) -> Result<usize, Box<dyn std::error::Error>> {
    let conn = peer.crr.conn();
    conn.execute_batch("BEGIN")?;
    for change in &changeset.changes {
        if let Err(e) = apply_change(peer, changeset, change) {
            conn.execute_batch("ROLLBACK")?;
            return Err(e);
        }
    }
    conn.execute_batch("COMMIT")?;
    Ok(changeset.changes.len())
}

fn apply_change(
    peer: &TestPeer,
    changeset: &Changeset,
    change: &Change,
) -> Result<(), Box<dyn std::error::Error>> {
    let conn = peer.crr.conn();
    let info = TableInfo::load(conn, "main", &change.table)?;
    let pk_names = info.pk_names();
    let pk_params: Vec<Value> = change.primary_key()?.iter().map(to_value).collect();
    let table = qualified(&info.schema, &info.table);
    let pk_list = identifier_list(&pk_names, None);

    if change.cid == CAUSAL_LENGTH_SENTINEL {
        if Lifecycle::from_causal_length(Some(change.col_version)).is_tombstoned() {
            let pk_match = crrlite_storage::sql::where_list(&pk_names);
            let delete_row = format!("DELETE FROM {table} WHERE {pk_match}");
            let delete_clock = format!(
                "DELETE FROM {clock} WHERE {pk_match} AND __crsql_col_name != {cl}",
                clock = qualified(&info.schema, &info.clock_table()),
                cl = quote_literal(CAUSAL_LENGTH_SENTINEL),
            );
            conn.execute(&delete_row, rusqlite::params_from_iter(pk_params.iter()))?;
            conn.execute(&delete_clock, rusqlite::params_from_iter(pk_params.iter()))?;
        }
    } else if change.cid == PKS_ONLY_SENTINEL {
        let sql = format!(
            "INSERT OR IGNORE INTO {table} ({pk_list}) VALUES ({})",
            binding_list(pk_names.len())
        );
        conn.execute(&sql, rusqlite::params_from_iter(pk_params.iter()))?;
    } else if info.has_non_pk(&change.cid) {
        if let Some(value) = &change.value {
            let col = quote_ident(&change.cid);
            let sql = format!(
                "INSERT INTO {table} ({pk_list}, {col}) VALUES ({}, ?)
                 ON CONFLICT ({pk_list}) DO UPDATE SET {col} = excluded.{col}",
                binding_list(pk_names.len())
            );
            let mut params = pk_params.clone();
            params.push(to_value(value));
            conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
        }
    }

    let sql = format!(
        "INSERT OR REPLACE INTO {clock}
          ({pk_list}, __crsql_col_name, __crsql_col_version, __crsql_db_version, __crsql_site_id, __crsql_seq)
          VALUES ({}, {}, ?, crsql_nextdbversion(), ?, ?)",
        binding_list(pk_names.len()),
        quote_literal(&change.cid),
        clock = qualified(&info.schema, &info.clock_table()),
    );
    let origin = change.site_id.unwrap_or(changeset.site_id);
    let mut params = pk_params;
    params.push(Value::Integer(change.col_version));
    params.push(Value::Blob(origin.as_bytes().to_vec()));
    params.push(Value::Integer(change.seq));
    conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
    Ok(())
}
