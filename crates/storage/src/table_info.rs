use rusqlite::{Connection, OptionalExtension};

use crrlite_core::consts::{CLOCK_TABLE_SUFFIX, INTERNAL_PREFIX};

use crate::error::StorageError;
use crate::sql::qualified;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// 1-based position within the primary key, 0 for non-key columns.
    pub pk: i64,
}

/// Ordered key and non-key columns of one table at one schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub schema: String,
    pub table: String,
    pub pks: Vec<ColumnInfo>,
    pub non_pks: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn load(conn: &Connection, schema: &str, table: &str) -> Result<Self, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1, ?2) ORDER BY cid",
        )?;
        let columns = stmt
            .query_map(rusqlite::params![table, schema], |row| {
                Ok(ColumnInfo {
                    cid: row.get(0)?,
                    name: row.get(1)?,
                    decl_type: row.get(2)?,
                    not_null: row.get(3)?,
                    default_value: row.get(4)?,
                    pk: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(StorageError::NotFound(format!("table {schema}.{table}")));
        }

        let (mut pks, non_pks): (Vec<_>, Vec<_>) = columns.into_iter().partition(|c| c.pk > 0);
        pks.sort_by_key(|c| c.pk);

        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
            pks,
            non_pks,
        })
    }

    pub fn pk_names(&self) -> Vec<&str> {
        self.pks.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn non_pk_names(&self) -> Vec<&str> {
        self.non_pks.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_non_pk(&self, name: &str) -> bool {
        self.non_pks.iter().any(|c| c.name == name)
    }

    pub fn clock_table(&self) -> String {
        crrlite_core::consts::clock_table_name(&self.table)
    }
}

pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool, StorageError> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE type = 'table' AND name = ?1",
        qualified(schema, "sqlite_master")
    );
    let found = conn
        .query_row(&sql, [table], |_| Ok(()))
        .optional()?
        .is_some();
    Ok(found)
}

/// Validate that `table` can carry clock metadata. Returns the reason as an
/// `Ineligible` error when it cannot.
pub fn is_table_compatible(conn: &Connection, schema: &str, table: &str) -> Result<(), StorageError> {
    if table.starts_with(INTERNAL_PREFIX) || table.ends_with(CLOCK_TABLE_SUFFIX) {
        return Err(StorageError::ineligible(table, "internal tables cannot be crrs"));
    }
    if schema.eq_ignore_ascii_case("temp") {
        return Err(StorageError::ineligible(table, "temp tables cannot be crrs"));
    }
    if !table_exists(conn, schema, table)? {
        return Err(StorageError::ineligible(table, "table does not exist"));
    }

    let pk_count: i64 = conn.query_row(
        "SELECT count(*) FROM pragma_table_info(?1, ?2) WHERE pk > 0",
        rusqlite::params![table, schema],
        |row| row.get(0),
    )?;
    if pk_count == 0 {
        return Err(StorageError::ineligible(table, "table must have a primary key"));
    }

    let unique_count: i64 = conn.query_row(
        "SELECT count(*) FROM pragma_index_list(?1, ?2) WHERE \"unique\" = 1 AND origin != 'pk'",
        rusqlite::params![table, schema],
        |row| row.get(0),
    )?;
    if unique_count > 0 {
        return Err(StorageError::ineligible(
            table,
            "unique indices besides the primary key are not allowed",
        ));
    }

    let fk_count: i64 = conn.query_row(
        "SELECT count(*) FROM pragma_foreign_key_list(?1, ?2)",
        rusqlite::params![table, schema],
        |row| row.get(0),
    )?;
    if fk_count > 0 {
        return Err(StorageError::ineligible(
            table,
            "foreign key constraints are not allowed",
        ));
    }

    Ok(())
}

/// Names of every table in `schema` that has a clock table, sorted.
pub fn crr_table_names(conn: &Connection, schema: &str) -> Result<Vec<String>, StorageError> {
    let sql = format!(
        "SELECT name FROM {} WHERE type = 'table' ORDER BY name",
        qualified(schema, "sqlite_master")
    );
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names
        .into_iter()
        .filter_map(|n| n.strip_suffix(CLOCK_TABLE_SUFFIX).map(str::to_string))
        .filter(|n| !n.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn pks_follow_key_order_not_column_order() {
        let conn = conn();
        conn.execute_batch("CREATE TABLE t (b, a, c, PRIMARY KEY (a, b))").unwrap();
        let info = TableInfo::load(&conn, "main", "t").unwrap();
        assert_eq!(info.pk_names(), vec!["a", "b"]);
        assert_eq!(info.non_pk_names(), vec!["c"]);
    }

    #[test]
    fn missing_table() {
        let result = TableInfo::load(&conn(), "main", "nope");
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn compatibility_rules() {
        let conn = conn();
        conn.execute_batch(
            "CREATE TABLE ok (id PRIMARY KEY, v);
             CREATE TABLE nopk (a, b);
             CREATE TABLE uniq (id PRIMARY KEY, email UNIQUE);
             CREATE TABLE child (id PRIMARY KEY, parent REFERENCES ok(id));",
        )
        .unwrap();

        assert!(is_table_compatible(&conn, "main", "ok").is_ok());
        for table in ["nopk", "uniq", "child", "missing", "__crsql_x", "ok__crsql_clock"] {
            let result = is_table_compatible(&conn, "main", table);
            assert!(
                matches!(result, Err(StorageError::Ineligible { .. })),
                "{table} should be ineligible"
            );
        }
    }

    #[test]
    fn attached_tables_are_eligible_but_temp_tables_are_not() {
        let conn = conn();
        conn.execute_batch(
            "ATTACH ':memory:' AS aux;
             CREATE TABLE aux.t (id PRIMARY KEY, v);
             CREATE TEMP TABLE scratch (id PRIMARY KEY, v);",
        )
        .unwrap();
        assert!(is_table_compatible(&conn, "aux", "t").is_ok());
        assert!(matches!(
            is_table_compatible(&conn, "temp", "scratch"),
            Err(StorageError::Ineligible { .. })
        ));
    }
}
