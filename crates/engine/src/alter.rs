//! Bracketing a schema migration of a crr.
//!
//! `begin_alter` opens the `alter_crr` savepoint and removes the table's
//! triggers so the migration itself is not versioned. `commit_alter`
//! reconciles the clock table with the new shape, re-activates the table
//! and releases the savepoint. One alter may be open per connection; the
//! session records which table it is for.

use rusqlite::Connection;

use crrlite_core::consts::CHANGES_VIEW;
use crrlite_storage::compact::{compact_post_alter, CompactionOutcome};
use crrlite_storage::sql::quote_ident;
use crrlite_storage::sqlite::{open_savepoint, release_savepoint, rollback_savepoint};
use crrlite_storage::table_info::TableInfo;
use crrlite_storage::triggers::remove_triggers;

use crate::activate::{activate, refresh_changes_view, Activation};
use crate::error::EngineError;
use crate::session::{lock, SharedSession};

pub(crate) const ALTER_SAVEPOINT: &str = "alter_crr";

pub(crate) fn begin_alter(conn: &Connection, session: &SharedSession, table: &str) -> Result<(), EngineError> {
    if let Some(pending) = lock(session)?.pending_alter() {
        return Err(EngineError::AlterInProgress(pending.to_string()));
    }
    open_savepoint(conn, ALTER_SAVEPOINT)?;
    let result = remove_triggers(conn, "main", table).and_then(|()| {
        // The view may stop resolving while the table is rebuilt.
        conn.execute_batch(&format!("DROP VIEW IF EXISTS temp.{}", quote_ident(CHANGES_VIEW)))?;
        Ok(())
    });
    if let Err(e) = result {
        rollback_savepoint(conn, ALTER_SAVEPOINT);
        return Err(e.into());
    }
    lock(session)?.set_pending_alter(Some(table.to_string()));
    tracing::info!(table, "began alter");
    Ok(())
}

pub(crate) fn commit_alter(
    conn: &Connection,
    session: &SharedSession,
    table: &str,
) -> Result<CompactionOutcome, EngineError> {
    {
        let mut state = lock(session)?;
        if state.pending_alter() != Some(table) {
            return Err(EngineError::NoAlterInProgress(table.to_string()));
        }
        state.set_pending_alter(None);
    }
    match finish_alter(conn, session, table) {
        Ok(outcome) => {
            tracing::info!(table, ?outcome, "committed alter");
            Ok(outcome)
        }
        Err(e) => {
            rollback_savepoint(conn, ALTER_SAVEPOINT);
            lock(session)?.invalidate_table_infos();
            Err(e)
        }
    }
}

fn finish_alter(
    conn: &Connection,
    session: &SharedSession,
    table: &str,
) -> Result<CompactionOutcome, EngineError> {
    let info = TableInfo::load(conn, "main", table)?;
    let current = lock(session)?.db_version(conn)?;
    let outcome = compact_post_alter(conn, "main", table, Some(&info), current)?;
    if activate(conn, session, "main", table, true)? == Activation::AlreadyCrr {
        refresh_changes_view(conn, session)?;
    }
    release_savepoint(conn, ALTER_SAVEPOINT)?;
    Ok(outcome)
}

/// Restores the pre-alter state without re-activating.
pub(crate) fn abort_alter(conn: &Connection, session: &SharedSession, table: &str) -> Result<(), EngineError> {
    tracing::info!(table, "aborted alter");
    rollback_savepoint(conn, ALTER_SAVEPOINT);
    let mut state = lock(session)?;
    state.set_pending_alter(None);
    state.invalidate_table_infos();
    Ok(())
}
