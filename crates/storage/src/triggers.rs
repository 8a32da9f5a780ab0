//! Change-capture triggers. Each table gets three `AFTER` triggers whose
//! bodies are upserts into the table's clock table.
//!
//! Sequence slots: every logical edit consumes exactly one slot. A clause
//! either allocates a fresh one with `crsql_increment_and_get_seq()` or
//! references the slot most recently allocated in the same trigger body with
//! `crsql_get_seq() - 1`.
//!
//! All clauses are suppressed while `crsql_internal_sync_bit()` is set.

use rusqlite::Connection;

use crrlite_core::consts::{CAUSAL_LENGTH_SENTINEL, PKS_ONLY_SENTINEL};

use crate::clock::trigger_names;
use crate::error::StorageError;
use crate::sql::{identifier_list, qualified, quote_ident, quote_literal, where_list_against};
use crate::table_info::TableInfo;

const SYNC_GUARD: &str = "crsql_internal_sync_bit() = 0";

/// Conflict branch shared by every clause that re-versions an existing
/// clock row as a fresh local edit.
const BUMP_ON_CONFLICT: &str = "__crsql_col_version = __crsql_col_version + 1,
          __crsql_db_version = crsql_nextdbversion(),
          __crsql_seq = crsql_get_seq() - 1,
          __crsql_site_id = NULL";

struct ClockTarget {
    clock: String,
    pk_list: String,
}

impl ClockTarget {
    fn new(info: &TableInfo) -> Self {
        Self {
            clock: quote_ident(&info.clock_table()),
            pk_list: identifier_list(&info.pk_names(), None),
        }
    }

    fn upsert(
        &self,
        pk_values: &str,
        col_name: &str,
        initial_version: i64,
        seq: &str,
        condition: &str,
        on_conflict: &str,
    ) -> String {
        format!(
            "INSERT INTO {clock} (
          {pk_list},
          __crsql_col_name,
          __crsql_col_version,
          __crsql_db_version,
          __crsql_seq,
          __crsql_site_id
        ) SELECT {pk_values}, {col_lit}, {initial_version}, crsql_nextdbversion(), {seq}, NULL
        WHERE {condition}
        ON CONFLICT ({pk_list}, __crsql_col_name) DO UPDATE SET
          {on_conflict};\n",
            clock = self.clock,
            pk_list = self.pk_list,
            col_lit = quote_literal(col_name),
        )
    }
}

fn versioned_columns(info: &TableInfo) -> Vec<&str> {
    if info.non_pks.is_empty() {
        vec![PKS_ONLY_SENTINEL]
    } else {
        info.non_pk_names()
    }
}

fn create_trigger(info: &TableInfo, name: &str, event: &str, body: &str) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS {name}
      AFTER {event} ON {table}
    BEGIN
      {body}
    END;",
        name = qualified(&info.schema, name),
        table = quote_ident(&info.table),
    )
}

pub fn insert_trigger_sql(info: &TableInfo) -> String {
    let target = ClockTarget::new(info);
    let pk_new = identifier_list(&info.pk_names(), Some("NEW."));

    let mut body = String::new();
    for col in versioned_columns(info) {
        body.push_str(&target.upsert(
            &pk_new,
            col,
            1,
            "crsql_increment_and_get_seq()",
            SYNC_GUARD,
            BUMP_ON_CONFLICT,
        ));
    }

    // Re-insert of a tombstoned key: flip the causal length back to live.
    body.push_str(&format!(
        "UPDATE {clock} SET
          {BUMP_ON_CONFLICT}
        WHERE {SYNC_GUARD} AND {pk_match} AND __crsql_col_name = {cl} AND __crsql_col_version % 2 = 0;\n",
        clock = target.clock,
        pk_match = where_list_against(&info.pk_names(), "NEW."),
        cl = quote_literal(CAUSAL_LENGTH_SENTINEL),
    ));

    let [name, _, _] = trigger_names(&info.table);
    create_trigger(info, &name, "INSERT", &body)
}

pub fn update_trigger_sql(info: &TableInfo) -> String {
    let target = ClockTarget::new(info);
    let pk_new = identifier_list(&info.pk_names(), Some("NEW."));

    // The causal-length clause allocates the row's slot; column clauses
    // below reference it.
    let mut body = target.upsert(
        &pk_new,
        CAUSAL_LENGTH_SENTINEL,
        1,
        "crsql_increment_and_get_seq()",
        SYNC_GUARD,
        "__crsql_col_version = CASE WHEN __crsql_col_version % 2 = 0 THEN __crsql_col_version + 1 ELSE __crsql_col_version END,
          __crsql_db_version = CASE WHEN __crsql_col_version % 2 = 0 THEN crsql_nextdbversion() ELSE __crsql_db_version END,
          __crsql_seq = CASE WHEN __crsql_col_version % 2 = 0 THEN crsql_get_seq() - 1 ELSE __crsql_seq END,
          __crsql_site_id = CASE WHEN __crsql_col_version % 2 = 0 THEN NULL ELSE __crsql_site_id END",
    );

    for col in info.non_pk_names() {
        let changed = format!(
            "{SYNC_GUARD} AND NEW.{c} IS NOT OLD.{c}",
            c = quote_ident(col)
        );
        body.push_str(&target.upsert(
            &pk_new,
            col,
            1,
            "crsql_get_seq() - 1",
            &changed,
            BUMP_ON_CONFLICT,
        ));
    }

    let [_, name, _] = trigger_names(&info.table);
    create_trigger(info, &name, "UPDATE", &body)
}

pub fn delete_trigger_sql(info: &TableInfo) -> String {
    let target = ClockTarget::new(info);
    let pk_old = identifier_list(&info.pk_names(), Some("OLD."));

    let mut body = target.upsert(
        &pk_old,
        CAUSAL_LENGTH_SENTINEL,
        2,
        "crsql_increment_and_get_seq()",
        SYNC_GUARD,
        BUMP_ON_CONFLICT,
    );
    body.push_str(&format!(
        "DELETE FROM {clock} WHERE {SYNC_GUARD} AND {pk_match} AND __crsql_col_name != {cl};\n",
        clock = target.clock,
        pk_match = where_list_against(&info.pk_names(), "OLD."),
        cl = quote_literal(CAUSAL_LENGTH_SENTINEL),
    ));

    let [_, _, name] = trigger_names(&info.table);
    create_trigger(info, &name, "DELETE", &body)
}

pub fn create_triggers(conn: &Connection, info: &TableInfo) -> Result<(), StorageError> {
    conn.execute_batch(&insert_trigger_sql(info))?;
    conn.execute_batch(&update_trigger_sql(info))?;
    conn.execute_batch(&delete_trigger_sql(info))?;
    Ok(())
}

pub fn remove_triggers(conn: &Connection, schema: &str, table: &str) -> Result<(), StorageError> {
    let sql = trigger_names(table)
        .iter()
        .map(|name| format!("DROP TRIGGER IF EXISTS {};", qualified(schema, name)))
        .collect::<Vec<_>>()
        .join("\n");
    conn.execute_batch(&sql)?;
    Ok(())
}
