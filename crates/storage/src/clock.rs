use rusqlite::{Connection, OptionalExtension};

use crrlite_core::consts::{
    clock_table_name, DELETE_TRIGGER_SUFFIX, INSERT_TRIGGER_SUFFIX, UPDATE_TRIGGER_SUFFIX,
};

use crate::error::StorageError;
use crate::sql::{identifier_list, qualified, quote_ident};
use crate::table_info::{table_exists, TableInfo};

pub fn create_clock_table_sql(info: &TableInfo) -> String {
    let pk_names = info.pk_names();
    let clock = info.clock_table();
    let pk_defs = identifier_list(&pk_names, None);
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
          {pk_defs},
          __crsql_col_name NOT NULL,
          __crsql_col_version NOT NULL,
          __crsql_db_version NOT NULL,
          __crsql_site_id,
          __crsql_seq NOT NULL,
          PRIMARY KEY ({pk_defs}, __crsql_col_name)
        );
        CREATE INDEX IF NOT EXISTS {index} ON {index_table} (__crsql_db_version);",
        table = qualified(&info.schema, &clock),
        index = qualified(&info.schema, &format!("{clock}_dbv_idx")),
        index_table = quote_ident(&clock),
    )
}

pub fn create_clock_table(conn: &Connection, info: &TableInfo) -> Result<(), StorageError> {
    conn.execute_batch(&create_clock_table_sql(info))?;
    Ok(())
}

pub fn drop_clock_table(conn: &Connection, schema: &str, table: &str) -> Result<(), StorageError> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {}",
        qualified(schema, &clock_table_name(table))
    ))?;
    Ok(())
}

pub fn clock_table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool, StorageError> {
    table_exists(conn, schema, &clock_table_name(table))
}

pub fn trigger_names(table: &str) -> [String; 3] {
    [
        format!("{table}{INSERT_TRIGGER_SUFFIX}"),
        format!("{table}{UPDATE_TRIGGER_SUFFIX}"),
        format!("{table}{DELETE_TRIGGER_SUFFIX}"),
    ]
}

/// A table is a crr once its clock table and all three triggers exist.
/// `begin_alter` removes the triggers, so an altered table reads as not yet
/// activated until `commit_alter` finishes.
pub fn is_crr(conn: &Connection, schema: &str, table: &str) -> Result<bool, StorageError> {
    if !clock_table_exists(conn, schema, table)? {
        return Ok(false);
    }
    let sql = format!(
        "SELECT 1 FROM {} WHERE type = 'trigger' AND tbl_name = ?1 AND name = ?2",
        qualified(schema, "sqlite_master")
    );
    for name in trigger_names(table) {
        let found = conn
            .query_row(&sql, rusqlite::params![table, name], |_| Ok(()))
            .optional()?
            .is_some();
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}
