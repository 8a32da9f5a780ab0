//! SQL functions and transaction hooks installed on every crr connection.

use std::mem::ManuallyDrop;

use rusqlite::functions::FunctionFlags;
use rusqlite::types::Null;
use rusqlite::{Connection, TransactionState};

use crrlite_core::pack::pack_columns;
use crrlite_storage::value::from_value_ref;

use crate::session::{SessionState, SharedSession};
use crate::{activate, alter};

fn user_error<E>(e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::UserFunctionError(Box::new(e))
}

fn poisoned() -> rusqlite::Error {
    rusqlite::Error::UserFunctionError("session state lock poisoned".into())
}

fn with_session<T>(
    session: &SharedSession,
    f: impl FnOnce(&mut SessionState) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let mut state = session.lock().map_err(|_| poisoned())?;
    f(&mut state)
}

/// A non-owning `Connection` on `conn`'s handle for a function to run its
/// own statements through. It is never dropped: dropping a rusqlite
/// `Connection` unregisters every hook on the handle, including the commit
/// and rollback hooks installed below.
fn callback_conn(conn: &Connection) -> rusqlite::Result<ManuallyDrop<Connection>> {
    // SAFETY: only the function closures registered on `conn` use the copy,
    // and SQLite runs them only while `conn`'s handle is open.
    let copy = unsafe { Connection::from_handle(conn.handle())? };
    Ok(ManuallyDrop::new(copy))
}

/// Runs a clock allocation. Outside a write transaction no hook will fire
/// to reset the clock, so nothing allocated there is kept.
fn with_clock<T>(
    conn: &Connection,
    session: &SharedSession,
    f: impl FnOnce(&mut SessionState, &Connection) -> Result<T, crrlite_storage::StorageError>,
) -> rusqlite::Result<T> {
    let writing = conn.transaction_state(None)? == TransactionState::Write;
    with_session(session, |state| {
        let result = f(state, conn).map_err(user_error);
        if !writing {
            state.reset_clock();
        }
        result
    })
}

fn on_transaction_end(session: &SharedSession, rolled_back: bool) {
    let mut state = match session.lock() {
        Ok(state) => state,
        Err(poisoned) => {
            tracing::warn!("session lock poisoned at transaction end");
            poisoned.into_inner()
        }
    };
    state.on_transaction_end();
    if rolled_back {
        state.invalidate_table_infos();
    }
}

pub fn register(conn: &Connection, session: &SharedSession) -> rusqlite::Result<()> {
    let volatile = FunctionFlags::SQLITE_UTF8;
    let pure = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    let direct = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DIRECTONLY;

    let site_id = with_session(session, |state| Ok(state.site_id()))?;
    conn.create_scalar_function("crsql_siteid", 0, pure, move |_ctx| {
        Ok(site_id.as_bytes().to_vec())
    })?;

    let (s, db) = (session.clone(), callback_conn(conn)?);
    conn.create_scalar_function("crsql_dbversion", 0, volatile, move |_ctx| {
        with_clock(&db, &s, |state, conn| state.db_version(conn))
    })?;

    let (s, db) = (session.clone(), callback_conn(conn)?);
    conn.create_scalar_function("crsql_nextdbversion", 0, volatile, move |_ctx| {
        with_clock(&db, &s, |state, conn| state.next_db_version(conn))
    })?;

    let (s, db) = (session.clone(), callback_conn(conn)?);
    conn.create_scalar_function("crsql_increment_and_get_seq", 0, volatile, move |_ctx| {
        with_clock(&db, &s, |state, _| Ok(state.next_seq()))
    })?;

    let s = session.clone();
    conn.create_scalar_function("crsql_get_seq", 0, volatile, move |_ctx| {
        with_session(&s, |state| Ok(state.peek_seq()))
    })?;

    let s = session.clone();
    conn.create_scalar_function("crsql_internal_sync_bit", -1, volatile, move |ctx| {
        match ctx.len() {
            0 => with_session(&s, |state| Ok(state.sync_bit())),
            1 => {
                let value: i64 = ctx.get(0)?;
                with_session(&s, |state| {
                    state.set_sync_bit(value);
                    Ok(value)
                })
            }
            n => Err(rusqlite::Error::UserFunctionError(
                format!("crsql_internal_sync_bit takes 0 or 1 arguments, got {n}").into(),
            )),
        }
    })?;

    conn.create_scalar_function("crsql_pack_columns", -1, pure, |ctx| {
        let values = (0..ctx.len())
            .map(|i| from_value_ref(ctx.get_raw(i)).map_err(user_error))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        pack_columns(&values).map_err(user_error)
    })?;

    // `crsql_as_crr(table)` or `crsql_as_crr(schema, table)`.
    let (s, db) = (session.clone(), callback_conn(conn)?);
    conn.create_scalar_function("crsql_as_crr", -1, direct, move |ctx| {
        let (schema, table) = match ctx.len() {
            1 => ("main".to_string(), ctx.get::<String>(0)?),
            2 => (ctx.get::<String>(0)?, ctx.get::<String>(1)?),
            n => {
                return Err(rusqlite::Error::UserFunctionError(
                    format!("crsql_as_crr takes 1 or 2 arguments, got {n}").into(),
                ));
            }
        };
        activate::as_crr(&db, &s, &schema, &table).map_err(user_error)?;
        Ok(Null)
    })?;

    let (s, db) = (session.clone(), callback_conn(conn)?);
    conn.create_scalar_function("crsql_begin_alter", 1, direct, move |ctx| {
        alter::begin_alter(&db, &s, &ctx.get::<String>(0)?).map_err(user_error)?;
        Ok(Null)
    })?;

    let (s, db) = (session.clone(), callback_conn(conn)?);
    conn.create_scalar_function("crsql_commit_alter", 1, direct, move |ctx| {
        alter::commit_alter(&db, &s, &ctx.get::<String>(0)?).map_err(user_error)?;
        Ok(Null)
    })?;

    let s = session.clone();
    conn.commit_hook(Some(move || {
        on_transaction_end(&s, false);
        false
    }));
    let s = session.clone();
    conn.rollback_hook(Some(move || on_transaction_end(&s, true)));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crrlite_core::pack::unpack_columns;
    use crrlite_core::{ColumnValue, SiteId};

    fn connection() -> (Connection, SharedSession, SiteId) {
        let conn = Connection::open_in_memory().unwrap();
        crrlite_storage::schema::init_schema(&conn).unwrap();
        let site_id = SiteId::generate();
        let session = SessionState::shared(site_id);
        register(&conn, &session).unwrap();
        (conn, session, site_id)
    }

    #[test]
    fn site_id_is_a_sixteen_byte_blob() {
        let (conn, _, site_id) = connection();
        let bytes: Vec<u8> = conn.query_row("SELECT crsql_siteid()", [], |r| r.get(0)).unwrap();
        assert_eq!(bytes.as_slice(), site_id.as_bytes());
    }

    #[test]
    fn next_db_version_is_stable_within_a_transaction() -> Result<(), Box<dyn std::error::Error>> {
        let (conn, _, _) = connection();
        conn.execute_batch("BEGIN")?;
        let a: i64 = conn.query_row("SELECT crsql_nextdbversion()", [], |r| r.get(0))?;
        let b: i64 = conn.query_row("SELECT crsql_nextdbversion()", [], |r| r.get(0))?;
        let current: i64 = conn.query_row("SELECT crsql_dbversion()", [], |r| r.get(0))?;
        conn.execute_batch("COMMIT")?;
        assert_eq!(a, 1);
        assert_eq!(a, b);
        assert_eq!(current, 0);
        Ok(())
    }

    #[test]
    fn seq_resets_on_commit_and_rollback() -> Result<(), Box<dyn std::error::Error>> {
        let (conn, session, _) = connection();
        conn.execute_batch("BEGIN; CREATE TABLE w (a);")?;
        let first: i64 = conn.query_row("SELECT crsql_increment_and_get_seq()", [], |r| r.get(0))?;
        let second: i64 = conn.query_row("SELECT crsql_increment_and_get_seq()", [], |r| r.get(0))?;
        let peek: i64 = conn.query_row("SELECT crsql_get_seq()", [], |r| r.get(0))?;
        assert_eq!((first, second, peek), (0, 1, 2));
        conn.execute_batch("ROLLBACK")?;
        assert_eq!(session.lock().unwrap().peek_seq(), 0);

        conn.execute_batch("BEGIN; CREATE TABLE x (a);")?;
        conn.query_row("SELECT crsql_nextdbversion()", [], |r| r.get::<_, i64>(0))?;
        conn.query_row("SELECT crsql_increment_and_get_seq()", [], |r| r.get::<_, i64>(0))?;
        conn.execute_batch("COMMIT")?;
        assert_eq!(session.lock().unwrap().peek_seq(), 0);
        Ok(())
    }

    #[test]
    fn hooks_outlive_clock_lookups() -> Result<(), Box<dyn std::error::Error>> {
        let (conn, session, _) = connection();
        for table in ["one", "two", "three"] {
            conn.execute_batch(&format!("BEGIN; CREATE TABLE {table} (a);"))?;
            let (version, seq): (i64, i64) = conn.query_row(
                "SELECT crsql_dbversion(), crsql_increment_and_get_seq()",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            conn.execute_batch("COMMIT")?;
            assert_eq!((version, seq), (0, 0), "clock carried over into {table}");
            assert_eq!(session.lock().unwrap().peek_seq(), 0);
        }
        Ok(())
    }

    #[test]
    fn allocations_outside_a_write_transaction_are_not_kept() -> Result<(), Box<dyn std::error::Error>> {
        let (conn, session, _) = connection();
        for _ in 0..2 {
            let seq: i64 = conn.query_row("SELECT crsql_increment_and_get_seq()", [], |r| r.get(0))?;
            assert_eq!(seq, 0);
        }
        assert_eq!(session.lock().unwrap().peek_seq(), 0);

        conn.execute_batch("BEGIN")?;
        conn.query_row("SELECT crsql_nextdbversion()", [], |r| r.get::<_, i64>(0))?;
        conn.execute_batch("CREATE TABLE later (a)")?;
        let seq: i64 = conn.query_row("SELECT crsql_increment_and_get_seq()", [], |r| r.get(0))?;
        conn.execute_batch("COMMIT")?;
        assert_eq!(seq, 0);
        Ok(())
    }

    #[test]
    fn sync_bit_reads_and_sets() -> Result<(), Box<dyn std::error::Error>> {
        let (conn, session, _) = connection();
        let bit: i64 = conn.query_row("SELECT crsql_internal_sync_bit()", [], |r| r.get(0))?;
        assert_eq!(bit, 0);
        let set: i64 = conn.query_row("SELECT crsql_internal_sync_bit(1)", [], |r| r.get(0))?;
        assert_eq!(set, 1);
        assert_eq!(session.lock().unwrap().sync_bit(), 1);
        assert!(conn
            .query_row("SELECT crsql_internal_sync_bit(1, 2)", [], |r| r.get::<_, i64>(0))
            .is_err());
        Ok(())
    }

    #[test]
    fn pack_columns_matches_the_codec() -> Result<(), Box<dyn std::error::Error>> {
        let (conn, _, _) = connection();
        let packed: Vec<u8> =
            conn.query_row("SELECT crsql_pack_columns(1, 'two', NULL, x'03')", [], |r| r.get(0))?;
        assert_eq!(
            unpack_columns(&packed)?,
            vec![
                ColumnValue::Integer(1),
                ColumnValue::Text("two".into()),
                ColumnValue::Null,
                ColumnValue::Blob(vec![3]),
            ]
        );
        Ok(())
    }
}
