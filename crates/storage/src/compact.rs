//! Reconcile a clock table with its base table after an ALTER TABLE.

use rusqlite::Connection;
use rusqlite::types::Value;

use crrlite_core::consts::{CAUSAL_LENGTH_SENTINEL, PKS_ONLY_SENTINEL, PRE_COMPACT_DBVERSION_KEY};

use crate::clock::drop_clock_table;
use crate::error::StorageError;
use crate::schema::set_master_value;
use crate::sql::{qualified, quote_ident, quote_literal};
use crate::table_info::TableInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Primary key changed: the clock table was dropped and must be rebuilt.
    Rebuilt,
    /// Clock rows for removed columns or vanished rows were deleted.
    Compacted { removed: usize },
}

/// Whether the base table's primary-key column set differs from the clock
/// table's (ignoring the clock table's own `__crsql_col_name` key column).
pub fn pk_columns_differ(conn: &Connection, schema: &str, table: &str) -> Result<bool, StorageError> {
    let clock = crrlite_core::consts::clock_table_name(table);
    let diff: i64 = conn.query_row(
        "SELECT count(name) FROM (
          SELECT name FROM pragma_table_info(?1, ?3) WHERE pk > 0
            AND name NOT IN (SELECT name FROM pragma_table_info(?2, ?3) WHERE pk > 0)
          UNION
          SELECT name FROM pragma_table_info(?2, ?3) WHERE pk > 0
            AND name NOT IN (SELECT name FROM pragma_table_info(?1, ?3) WHERE pk > 0)
            AND name != '__crsql_col_name'
        )",
        rusqlite::params![table, clock, schema],
        |row| row.get(0),
    )?;
    Ok(diff > 0)
}

/// `info` is the table's metadata after the alter; it is required for the
/// incremental path. `current_db_version` is persisted under
/// `pre_compact_dbversion` in either case.
pub fn compact_post_alter(
    conn: &Connection,
    schema: &str,
    table: &str,
    info: Option<&TableInfo>,
    current_db_version: i64,
) -> Result<CompactionOutcome, StorageError> {
    let outcome = if pk_columns_differ(conn, schema, table)? {
        drop_clock_table(conn, schema, table)?;
        CompactionOutcome::Rebuilt
    } else {
        let info = info.ok_or_else(|| {
            StorageError::Consistency(format!("no table info cached for crr {table}"))
        })?;
        let removed = prune_dropped_columns(conn, info)? + prune_vanished_rows(conn, info)?;
        CompactionOutcome::Compacted { removed }
    };

    set_master_value(conn, PRE_COMPACT_DBVERSION_KEY, &Value::Integer(current_db_version))?;
    tracing::info!(table, ?outcome, current_db_version, "compacted clock table after alter");
    Ok(outcome)
}

fn prune_dropped_columns(conn: &Connection, info: &TableInfo) -> Result<usize, StorageError> {
    let sql = format!(
        "DELETE FROM {clock} WHERE __crsql_col_name NOT IN
          (SELECT name FROM pragma_table_info(?1, ?2) UNION SELECT {cl} UNION SELECT {pko})",
        clock = qualified(&info.schema, &info.clock_table()),
        cl = quote_literal(CAUSAL_LENGTH_SENTINEL),
        pko = quote_literal(PKS_ONLY_SENTINEL),
    );
    Ok(conn.execute(&sql, rusqlite::params![info.table, info.schema])?)
}

/// The causal-length row is meant to outlive its base row and is kept.
fn prune_vanished_rows(conn: &Connection, info: &TableInfo) -> Result<usize, StorageError> {
    let clock_ident = quote_ident(&info.clock_table());
    let table_ident = quote_ident(&info.table);
    let pk_match = info
        .pk_names()
        .iter()
        .map(|c| {
            let c = quote_ident(c);
            format!("{table_ident}.{c} = {clock_ident}.{c}")
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "DELETE FROM {clock} WHERE __crsql_col_name != {cl} AND NOT EXISTS
          (SELECT 1 FROM {table} WHERE {pk_match} LIMIT 1)",
        clock = qualified(&info.schema, &info.clock_table()),
        table = qualified(&info.schema, &info.table),
        cl = quote_literal(CAUSAL_LENGTH_SENTINEL),
    );
    Ok(conn.execute(&sql, [])?)
}
