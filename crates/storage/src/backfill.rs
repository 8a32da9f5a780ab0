//! Version rows that existed before a table became a crr (or before a
//! column was added to it), so they ship like any other insert.

use rusqlite::Connection;
use rusqlite::types::Value;

use crrlite_core::consts::PKS_ONLY_SENTINEL;

use crate::error::StorageError;
use crate::sql::{binding_list, identifier_list, qualified, quote_ident};
use crate::sqlite::in_savepoint;
use crate::table_info::TableInfo;

/// Returns the number of clock rows written.
///
/// During a commit-alter the rows are stamped with the current db_version
/// rather than the next one: peers applying the same migration reach the
/// same state, so the backfill must not look like new changes.
pub fn backfill_table(
    conn: &Connection,
    info: &TableInfo,
    is_commit_alter: bool,
) -> Result<usize, StorageError> {
    in_savepoint(conn, "backfill", |conn| {
        let writer = ClockWriter::new(info, is_commit_alter);

        let untracked = untracked_rows(conn, info)?;
        let mut written = 0;
        let cols = if info.non_pks.is_empty() {
            vec![PKS_ONLY_SENTINEL]
        } else {
            info.non_pk_names()
        };
        for pk_values in &untracked {
            for col in &cols {
                written += writer.write(conn, pk_values, col)?;
            }
        }

        for col in &info.non_pks {
            let missing = rows_missing_column(conn, info, &col.name, col.default_value.as_deref())?;
            for pk_values in &missing {
                written += writer.write(conn, pk_values, &col.name)?;
            }
        }

        tracing::debug!(table = %info.table, written, "backfilled clock rows");
        Ok(written)
    })
}

struct ClockWriter {
    sql: String,
}

impl ClockWriter {
    fn new(info: &TableInfo, is_commit_alter: bool) -> Self {
        let pk_names = info.pk_names();
        let sql = format!(
            "INSERT INTO {clock}
          ({pk_cols}, __crsql_col_name, __crsql_col_version, __crsql_db_version, __crsql_seq) VALUES
          ({pk_values}, ?, 1, {dbversion}, crsql_increment_and_get_seq())",
            clock = qualified(&info.schema, &info.clock_table()),
            pk_cols = identifier_list(&pk_names, None),
            pk_values = binding_list(pk_names.len()),
            dbversion = if is_commit_alter {
                "crsql_dbversion()"
            } else {
                "crsql_nextdbversion()"
            },
        );
        Self { sql }
    }

    fn write(&self, conn: &Connection, pk_values: &[Value], col: &str) -> Result<usize, StorageError> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        let mut params: Vec<Value> = pk_values.to_vec();
        params.push(Value::Text(col.to_string()));
        Ok(stmt.execute(rusqlite::params_from_iter(params.iter()))?)
    }
}

fn pk_match(pk_names: &[&str]) -> String {
    pk_names
        .iter()
        .map(|c| format!("t1.{c} IS t2.{c}", c = quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn t1_pk_list(pk_names: &[&str]) -> String {
    pk_names
        .iter()
        .map(|c| format!("t1.{}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn collect_pk_rows(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    width: usize,
) -> Result<Vec<Vec<Value>>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rows with no clock entry at all.
fn untracked_rows(conn: &Connection, info: &TableInfo) -> Result<Vec<Vec<Value>>, StorageError> {
    let pk_names = info.pk_names();
    let sql = format!(
        "SELECT {pk_cols} FROM {table} AS t1
        WHERE NOT EXISTS
          (SELECT 1 FROM {clock} AS t2 WHERE {pk_match})",
        pk_cols = t1_pk_list(&pk_names),
        table = qualified(&info.schema, &info.table),
        clock = qualified(&info.schema, &info.clock_table()),
        pk_match = pk_match(&pk_names),
    );
    collect_pk_rows(conn, &sql, &[], pk_names.len())
}

/// Tracked rows lacking an entry for `col`, skipping rows that still hold
/// the column default (an implicit default is indistinguishable from no edit).
fn rows_missing_column(
    conn: &Connection,
    info: &TableInfo,
    col: &str,
    default_value: Option<&str>,
) -> Result<Vec<Vec<Value>>, StorageError> {
    let pk_names = info.pk_names();
    let default_condition = match default_value {
        Some(dflt) => format!("AND t1.{} IS NOT {dflt}", quote_ident(col)),
        None => String::new(),
    };
    let sql = format!(
        "SELECT {pk_cols} FROM {table} AS t1
          LEFT JOIN {clock} AS t2 ON {pk_match} AND t2.__crsql_col_name = ?1
          WHERE t2.__crsql_col_name IS NULL {default_condition}",
        pk_cols = t1_pk_list(&pk_names),
        table = qualified(&info.schema, &info.table),
        clock = qualified(&info.schema, &info.clock_table()),
        pk_match = pk_match(&pk_names),
    );
    collect_pk_rows(conn, &sql, &[Value::Text(col.to_string())], pk_names.len())
}
