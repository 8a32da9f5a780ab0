use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};

use crrlite_core::SiteId;

use crate::error::StorageError;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    // journal_mode reports the resulting mode as a row; in-memory databases
    // stay on `memory`.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS __crsql_siteid (
    site_id BLOB NOT NULL CHECK (length(site_id) = 16)
);

CREATE TABLE IF NOT EXISTS crsql_master (
    key TEXT PRIMARY KEY,
    value
);
";

/// The persisted site id, generating and storing one on first use.
pub fn load_or_create_site_id(conn: &Connection) -> Result<SiteId, StorageError> {
    let existing: Option<Vec<u8>> = conn
        .query_row("SELECT site_id FROM __crsql_siteid LIMIT 1", [], |row| row.get(0))
        .optional()?;
    if let Some(bytes) = existing {
        return Ok(SiteId::from_slice(&bytes)?);
    }

    let site_id = SiteId::generate();
    conn.execute(
        "INSERT INTO __crsql_siteid (site_id) VALUES (?1)",
        [site_id.as_bytes().as_slice()],
    )?;
    tracing::info!(%site_id, "generated site id");
    Ok(site_id)
}

pub fn master_value(conn: &Connection, key: &str) -> Result<Option<Value>, StorageError> {
    let value = conn
        .query_row("SELECT value FROM crsql_master WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

pub fn set_master_value(conn: &Connection, key: &str, value: &Value) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR REPLACE INTO crsql_master (key, value) VALUES (?1, ?2)",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn site_id_is_generated_once() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let first = load_or_create_site_id(&conn).unwrap();
        let second = load_or_create_site_id(&conn).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn master_values_are_replaced() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(master_value(&conn, "k").unwrap(), None);
        set_master_value(&conn, "k", &Value::Integer(1)).unwrap();
        set_master_value(&conn, "k", &Value::Integer(2)).unwrap();
        assert_eq!(master_value(&conn, "k").unwrap(), Some(Value::Integer(2)));
    }
}
