use std::path::Path;

use rusqlite::OptionalExtension;

use crrlite_core::{ColumnValue, SiteId};
use crrlite_engine::{Crr, EngineError};
use crrlite_storage::{ClockEntry, ClockStore};

pub struct TestPeer {
    pub crr: Crr,
}

impl TestPeer {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self {
            crr: Crr::open_in_memory()?,
        })
    }

    pub fn open(path: &Path) -> Result<Self, EngineError> {
        Ok(Self {
            crr: Crr::open(&path.to_string_lossy())?,
        })
    }

    pub fn site_id(&self) -> Result<SiteId, EngineError> {
        self.crr.site_id()
    }

    pub fn exec(&self, sql: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.crr.conn().execute_batch(sql)?;
        Ok(())
    }

    /// Create a table from `ddl` and activate it.
    pub fn create_crr(&self, table: &str, ddl: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.exec(ddl)?;
        self.crr.as_crr(table)?;
        Ok(())
    }

    pub fn count(&self, sql: &str) -> Result<i64, Box<dyn std::error::Error>> {
        Ok(self.crr.conn().query_row(sql, [], |row| row.get(0))?)
    }

    pub fn clock_rows(&self, table: &str) -> Result<Vec<ClockEntry>, Box<dyn std::error::Error>> {
        Ok(self.crr.storage().clock_entries(table)?)
    }

    /// Clock rows of the single-column key `pk`.
    pub fn clock_rows_for(
        &self,
        table: &str,
        pk: impl Into<ColumnValue>,
    ) -> Result<Vec<ClockEntry>, Box<dyn std::error::Error>> {
        let pk = vec![pk.into()];
        Ok(self
            .clock_rows(table)?
            .into_iter()
            .filter(|entry| entry.pk == pk)
            .collect())
    }

    pub fn clock_row(
        &self,
        table: &str,
        pk: impl Into<ColumnValue>,
        col: &str,
    ) -> Result<Option<ClockEntry>, Box<dyn std::error::Error>> {
        Ok(self
            .clock_rows_for(table, pk)?
            .into_iter()
            .find(|entry| entry.col_name == col))
    }

    /// `(type, name, sql)` of every schema object, temp objects included,
    /// in a stable order.
    pub fn schema_snapshot(&self) -> Result<Vec<(String, String, Option<String>)>, Box<dyn std::error::Error>> {
        let mut stmt = self.crr.conn().prepare(
            "SELECT type, name, sql FROM sqlite_master
             UNION ALL SELECT type, name, sql FROM sqlite_temp_master
             ORDER BY 1, 2",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn value(
        &self,
        table: &str,
        pk: i64,
        col: &str,
    ) -> Result<Option<ColumnValue>, Box<dyn std::error::Error>> {
        let sql = format!(
            "SELECT {col} FROM {table} WHERE {pk_col} = ?1",
            col = crrlite_storage::sql::quote_ident(col),
            table = crrlite_storage::sql::quote_ident(table),
            pk_col = crrlite_storage::sql::quote_ident(&self.first_pk(table)?),
        );
        let value = self
            .crr
            .conn()
            .query_row(&sql, [pk], |row| {
                Ok(crrlite_storage::value::from_value(row.get(0)?))
            })
            .optional()?;
        Ok(value)
    }

    fn first_pk(&self, table: &str) -> Result<String, Box<dyn std::error::Error>> {
        let info = crrlite_storage::TableInfo::load(self.crr.conn(), "main", table)?;
        let first = info
            .pks
            .first()
            .ok_or_else(|| format!("{table} has no primary key"))?;
        Ok(first.name.clone())
    }
}
