//! Turning a plain table into a crr.

use rusqlite::Connection;

use crrlite_storage::backfill::backfill_table;
use crrlite_storage::changes::create_changes_view;
use crrlite_storage::clock::{create_clock_table, is_crr};
use crrlite_storage::sqlite::in_savepoint;
use crrlite_storage::table_info::{is_table_compatible, TableInfo};
use crrlite_storage::triggers::{create_triggers, remove_triggers};

use crate::error::EngineError;
use crate::session::{lock, SharedSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    AlreadyCrr,
    Activated { backfilled: usize },
}

/// Activate `schema.table` inside the `as_crr` savepoint. On failure the
/// database is left as it was and the first error is returned.
pub(crate) fn as_crr(
    conn: &Connection,
    session: &SharedSession,
    schema: &str,
    table: &str,
) -> Result<Activation, EngineError> {
    let result = in_savepoint(conn, "as_crr", |conn| activate(conn, session, schema, table, false));
    if result.is_err() {
        lock(session)?.invalidate_table_infos();
    }
    result
}

/// Caller owns the enclosing savepoint.
pub(crate) fn activate(
    conn: &Connection,
    session: &SharedSession,
    schema: &str,
    table: &str,
    is_commit_alter: bool,
) -> Result<Activation, EngineError> {
    is_table_compatible(conn, schema, table)?;
    if is_crr(conn, schema, table)? {
        tracing::debug!(schema, table, "already a crr");
        return Ok(Activation::AlreadyCrr);
    }

    let info = TableInfo::load(conn, schema, table)?;
    create_clock_table(conn, &info)?;
    remove_triggers(conn, schema, table)?;
    create_triggers(conn, &info)?;
    let backfilled = backfill_table(conn, &info, is_commit_alter)?;
    refresh_changes_view(conn, session)?;

    tracing::info!(schema, table, backfilled, is_commit_alter, "activated crr");
    Ok(Activation::Activated { backfilled })
}

pub(crate) fn refresh_changes_view(conn: &Connection, session: &SharedSession) -> Result<(), EngineError> {
    let infos = lock(session)?.ensure_table_infos(conn)?.to_vec();
    create_changes_view(conn, &infos)?;
    Ok(())
}
