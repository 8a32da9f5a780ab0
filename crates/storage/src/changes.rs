use rusqlite::Connection;
use rusqlite::types::Value;

use crrlite_core::consts::{is_sentinel, CHANGES_VIEW};

use crate::error::StorageError;
use crate::sql::{identifier_list, qualified, quote_ident, quote_literal, where_list};
use crate::table_info::TableInfo;

/// Raw projection of one clock row as produced by [`changes_union_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRow {
    pub table: String,
    pub pks: Vec<u8>,
    pub cid: String,
    pub col_version: i64,
    pub db_version: i64,
    pub site_id: Option<Vec<u8>>,
    pub rowid: i64,
    pub seq: i64,
}

pub fn changes_query_for_table(info: &TableInfo) -> String {
    format!(
        "SELECT
          {table_val} as tbl,
          crsql_pack_columns({pk_list}) as pks,
          __crsql_col_name as cid,
          __crsql_col_version as col_vrsn,
          __crsql_db_version as db_vrsn,
          __crsql_site_id as site_id,
          _rowid_,
          __crsql_seq as seq
      FROM {clock}",
        table_val = quote_literal(&info.table),
        pk_list = identifier_list(&info.pk_names(), None),
        clock = qualified(&info.schema, &info.clock_table()),
    )
}

/// Union of every table's clock projection, in the order given, with
/// `filter` appended verbatim after the closing parenthesis. The filter is
/// not interpreted; callers own its placeholders.
///
/// Returns `None` when there are no tables to union.
pub fn changes_union_query(infos: &[TableInfo], filter: &str) -> Option<String> {
    if infos.is_empty() {
        return None;
    }
    let unions = infos
        .iter()
        .map(changes_query_for_table)
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    Some(format!(
        "SELECT tbl, pks, cid, col_vrsn, db_vrsn, site_id, _rowid_, seq FROM ({unions}) {filter}"
    ))
}

/// Point lookup of a column's live value, one positional parameter per
/// primary-key column in key order. Sentinels and columns the table no
/// longer has carry no value.
pub fn row_patch_query(info: &TableInfo, col_name: &str) -> Option<String> {
    if is_sentinel(col_name) || !info.has_non_pk(col_name) {
        return None;
    }
    Some(format!(
        "SELECT {col} FROM {table} WHERE {where_list}",
        col = quote_ident(col_name),
        table = qualified(&info.schema, &info.table),
        where_list = where_list(&info.pk_names()),
    ))
}

pub fn read_change_rows(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<Vec<ChangeRow>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(ChangeRow {
                table: row.get(0)?,
                pks: row.get(1)?,
                cid: row.get(2)?,
                col_version: row.get(3)?,
                db_version: row.get(4)?,
                site_id: row.get(5)?,
                rowid: row.get(6)?,
                seq: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// (Re)install the per-connection `crsql_changes` view over `infos`.
pub fn create_changes_view(conn: &Connection, infos: &[TableInfo]) -> Result<(), StorageError> {
    conn.execute_batch(&format!("DROP VIEW IF EXISTS temp.{}", quote_ident(CHANGES_VIEW)))?;
    if let Some(union) = changes_union_query(infos, "") {
        conn.execute_batch(&format!(
            "CREATE TEMP VIEW {} AS {union}",
            quote_ident(CHANGES_VIEW)
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infos(conn: &Connection) -> Vec<TableInfo> {
        conn.execute_batch(
            "CREATE TABLE foo (a PRIMARY KEY, b);
             CREATE TABLE bar (\"x\" PRIMARY KEY, [y]);",
        )
        .unwrap();
        vec![
            TableInfo::load(conn, "main", "foo").unwrap(),
            TableInfo::load(conn, "main", "bar").unwrap(),
        ]
    }

    const FOO_BAR_UNION: &str = "SELECT tbl, pks, cid, col_vrsn, db_vrsn, site_id, _rowid_, seq FROM (SELECT
          'foo' as tbl,
          crsql_pack_columns(\"a\") as pks,
          __crsql_col_name as cid,
          __crsql_col_version as col_vrsn,
          __crsql_db_version as db_vrsn,
          __crsql_site_id as site_id,
          _rowid_,
          __crsql_seq as seq
      FROM \"foo__crsql_clock\" UNION ALL SELECT
          'bar' as tbl,
          crsql_pack_columns(\"x\") as pks,
          __crsql_col_name as cid,
          __crsql_col_version as col_vrsn,
          __crsql_db_version as db_vrsn,
          __crsql_site_id as site_id,
          _rowid_,
          __crsql_seq as seq
      FROM \"bar__crsql_clock\") ";

    #[test]
    fn union_query_without_filter() {
        let conn = Connection::open_in_memory().unwrap();
        let query = changes_union_query(&infos(&conn), "").unwrap();
        assert_eq!(query, FOO_BAR_UNION);
    }

    #[test]
    fn union_query_appends_filter_verbatim() {
        let conn = Connection::open_in_memory().unwrap();
        let query =
            changes_union_query(&infos(&conn), "WHERE site_id IS ? AND db_vrsn > ?").unwrap();
        assert_eq!(query, format!("{FOO_BAR_UNION}WHERE site_id IS ? AND db_vrsn > ?"));
    }

    #[test]
    fn union_query_respects_caller_order() {
        let conn = Connection::open_in_memory().unwrap();
        let mut infos = infos(&conn);
        infos.reverse();
        let query = changes_union_query(&infos, "").unwrap();
        assert!(query.find("'bar' as tbl").unwrap() < query.find("'foo' as tbl").unwrap());
        assert!(changes_union_query(&[], "").is_none());
    }

    #[test]
    fn row_patch_query_single_pk() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE foo (a PRIMARY KEY, b, c, d)").unwrap();
        let info = TableInfo::load(&conn, "main", "foo").unwrap();
        let query = row_patch_query(&info, "b").unwrap();
        assert_eq!(query, "SELECT \"b\" FROM \"foo\" WHERE \"a\" = ?");
        assert_eq!(query.matches('?').count(), 1);
    }

    #[test]
    fn row_patch_query_composite_pk_and_keyword_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k2, k1, \"order\", PRIMARY KEY (k1, k2))").unwrap();
        let info = TableInfo::load(&conn, "main", "t").unwrap();
        assert_eq!(
            row_patch_query(&info, "order").unwrap(),
            "SELECT \"order\" FROM \"t\" WHERE \"k1\" = ? AND \"k2\" = ?"
        );
    }

    #[test]
    fn row_patch_query_skips_sentinels() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE foo (a PRIMARY KEY, b)").unwrap();
        let info = TableInfo::load(&conn, "main", "foo").unwrap();
        assert!(row_patch_query(&info, "__crsql_cl").is_none());
        assert!(row_patch_query(&info, "__crsql_pko").is_none());
        assert!(row_patch_query(&info, "gone").is_none());
    }
}
