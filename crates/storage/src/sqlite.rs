use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};

use crrlite_core::consts::PRE_COMPACT_DBVERSION_KEY;
use crrlite_core::{ColumnValue, SiteId};

use crate::error::StorageError;
use crate::sql::{qualified, quote_ident, quote_literal, where_list};
use crate::table_info::{crr_table_names, TableInfo};
use crate::traits::{ClockEntry, ClockStore};
use crate::value::{from_value_ref, to_value};

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Run `f` inside a named savepoint. On failure the savepoint is rolled back
/// and released, and `f`'s error is returned even if the rollback fails too.
pub fn in_savepoint<T, E, F>(conn: &Connection, name: &str, f: F) -> Result<T, E>
where
    F: FnOnce(&Connection) -> Result<T, E>,
    E: From<StorageError>,
{
    open_savepoint(conn, name)?;
    match f(conn) {
        Ok(value) => {
            release_savepoint(conn, name)?;
            Ok(value)
        }
        Err(e) => {
            rollback_savepoint(conn, name);
            Err(e)
        }
    }
}

pub fn open_savepoint(conn: &Connection, name: &str) -> Result<(), StorageError> {
    conn.execute_batch(&format!("SAVEPOINT {}", quote_ident(name)))?;
    Ok(())
}

pub fn release_savepoint(conn: &Connection, name: &str) -> Result<(), StorageError> {
    conn.execute_batch(&format!("RELEASE {}", quote_ident(name)))?;
    Ok(())
}

/// Best effort: the caller is already failing with a more useful error.
pub fn rollback_savepoint(conn: &Connection, name: &str) {
    let ident = quote_ident(name);
    if let Err(e) = conn.execute_batch(&format!("ROLLBACK TO {ident}; RELEASE {ident};")) {
        tracing::warn!(savepoint = name, error = %e, "savepoint rollback failed");
    }
}

/// Highest db_version ever made durable: the max over every clock table and
/// the value recorded before the last compaction (which may have deleted the
/// rows that carried it). 0 for a fresh database.
pub fn fetch_durable_db_version(conn: &Connection, infos: &[TableInfo]) -> Result<i64, StorageError> {
    let mut parts: Vec<String> = infos
        .iter()
        .map(|info| {
            format!(
                "SELECT max(__crsql_db_version) AS v FROM {}",
                qualified(&info.schema, &info.clock_table())
            )
        })
        .collect();
    parts.push(format!(
        "SELECT value AS v FROM crsql_master WHERE key = {}",
        quote_literal(PRE_COMPACT_DBVERSION_KEY)
    ));
    let sql = format!("SELECT max(v) FROM ({})", parts.join(" UNION ALL "));
    let version: Option<i64> = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

/// Metadata of every crr in `schema`, in name order. A clock table whose base
/// table was dropped mid-alter is skipped.
pub fn load_crr_table_infos(conn: &Connection, schema: &str) -> Result<Vec<TableInfo>, StorageError> {
    let mut infos = Vec::new();
    for name in crr_table_names(conn, schema)? {
        match TableInfo::load(conn, schema, &name) {
            Ok(info) => infos.push(info),
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(table = %name, "clock table without base table");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(infos)
}

/// Every attached schema that can hold a crr, in `database_list` order
/// (`main` first). `temp` is left out.
pub fn crr_schemas(conn: &Connection) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_database_list WHERE name != 'temp' ORDER BY seq")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

/// `PRAGMA <schema>.<counter>` for each schema, paired with its name.
/// `counter` is one of SQLite's integer change counters such as
/// `schema_version` or `data_version`.
pub fn schema_counters(
    conn: &Connection,
    schemas: &[String],
    counter: &str,
) -> Result<Vec<(String, i64)>, StorageError> {
    schemas
        .iter()
        .map(|schema| {
            let sql = format!("PRAGMA {}.{counter}", quote_ident(schema));
            let value: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok((schema.clone(), value))
        })
        .collect()
}

fn read_clock_entry(row: &rusqlite::Row, pk_width: usize) -> rusqlite::Result<ClockEntry> {
    let mut pk = Vec::with_capacity(pk_width);
    for i in 0..pk_width {
        pk.push(from_value_ref(row.get_ref(i)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(i, rusqlite::types::Type::Text, Box::new(e))
        })?);
    }
    let site_id: Option<Vec<u8>> = row.get(pk_width + 4)?;
    let site_id = site_id
        .map(|bytes| SiteId::from_slice(&bytes))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                pk_width + 4,
                rusqlite::types::Type::Blob,
                Box::new(e),
            )
        })?;
    Ok(ClockEntry {
        pk,
        col_name: row.get(pk_width)?,
        col_version: row.get(pk_width + 1)?,
        db_version: row.get(pk_width + 2)?,
        seq: row.get(pk_width + 3)?,
        site_id,
    })
}

impl ClockStore for SqliteStorage {
    fn crr_tables(&self) -> Result<Vec<TableInfo>, StorageError> {
        load_crr_table_infos(&self.conn, "main")
    }

    fn durable_db_version(&self) -> Result<i64, StorageError> {
        fetch_durable_db_version(&self.conn, &self.crr_tables()?)
    }

    fn clock_entries(&self, table: &str) -> Result<Vec<ClockEntry>, StorageError> {
        let info = TableInfo::load(&self.conn, "main", table)?;
        let sql = format!(
            "SELECT {pks}, __crsql_col_name, __crsql_col_version, __crsql_db_version, __crsql_seq, __crsql_site_id
             FROM {clock} ORDER BY __crsql_db_version, __crsql_seq, _rowid_",
            pks = crate::sql::identifier_list(&info.pk_names(), None),
            clock = quote_ident(&info.clock_table()),
        );
        let width = info.pks.len();
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], |row| read_clock_entry(row, width))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn causal_length(&self, table: &str, pk: &[ColumnValue]) -> Result<Option<i64>, StorageError> {
        let info = TableInfo::load(&self.conn, "main", table)?;
        if pk.len() != info.pks.len() {
            return Err(StorageError::Serialization(format!(
                "{table} has {} primary key columns, got {}",
                info.pks.len(),
                pk.len()
            )));
        }
        let sql = format!(
            "SELECT __crsql_col_version FROM {clock} WHERE {pk_match} AND __crsql_col_name = '__crsql_cl'",
            clock = quote_ident(&info.clock_table()),
            pk_match = where_list(&info.pk_names()),
        );
        let params: Vec<Value> = pk.iter().map(to_value).collect();
        let version = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| row.get(0))
            .optional()?;
        Ok(version)
    }

    fn master_value(&self, key: &str) -> Result<Option<Value>, StorageError> {
        crate::schema::master_value(&self.conn, key)
    }
}
