//! Reading the change stream back out of the clock tables.

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};

use crrlite_core::pack::unpack_columns;
use crrlite_core::{Change, ColumnValue, SiteId};
use crrlite_storage::changes::{changes_union_query, read_change_rows, row_patch_query, ChangeRow};
use crrlite_storage::value::{from_value_ref, to_value};
use crrlite_storage::{StorageError, TableInfo};

use crate::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SiteFilter {
    #[default]
    Any,
    /// Changes made on this database, not yet attributed to a peer.
    LocalOnly,
    Only(SiteId),
    /// Everything a peer has not already seen from itself, local changes
    /// included.
    Except(SiteId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Exclusive lower bound.
    pub since_db_version: Option<i64>,
    pub sites: SiteFilter,
    /// `None` reads every crr.
    pub tables: Option<Vec<String>>,
    pub limit: Option<u32>,
}

impl ChangeFilter {
    pub fn since(db_version: i64) -> Self {
        Self {
            since_db_version: Some(db_version),
            ..Self::default()
        }
    }

    pub fn for_peer(peer: SiteId, since_db_version: i64) -> Self {
        Self {
            since_db_version: Some(since_db_version),
            sites: SiteFilter::Except(peer),
            ..Self::default()
        }
    }

    /// Filter suffix for the union query and its positional parameters.
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(since) = self.since_db_version {
            conditions.push("db_vrsn > ?");
            params.push(Value::Integer(since));
        }
        match &self.sites {
            SiteFilter::Any => {}
            SiteFilter::LocalOnly => conditions.push("site_id IS NULL"),
            SiteFilter::Only(site) => {
                conditions.push("site_id = ?");
                params.push(Value::Blob(site.as_bytes().to_vec()));
            }
            SiteFilter::Except(site) => {
                conditions.push("site_id IS NOT ?");
                params.push(Value::Blob(site.as_bytes().to_vec()));
            }
        }

        let mut suffix = String::new();
        if !conditions.is_empty() {
            suffix.push_str("WHERE ");
            suffix.push_str(&conditions.join(" AND "));
            suffix.push(' ');
        }
        suffix.push_str("ORDER BY db_vrsn, seq");
        if let Some(limit) = self.limit {
            suffix.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::from(limit)));
        }
        (suffix, params)
    }

    fn selects(&self, info: &TableInfo) -> bool {
        self.tables
            .as_ref()
            .is_none_or(|tables| tables.iter().any(|t| *t == info.table))
    }
}

pub(crate) fn read_changes(
    conn: &Connection,
    infos: &[TableInfo],
    filter: &ChangeFilter,
) -> Result<Vec<Change>, EngineError> {
    let selected: Vec<TableInfo> = infos.iter().filter(|i| filter.selects(i)).cloned().collect();
    let (suffix, params) = filter.render();
    let Some(sql) = changes_union_query(&selected, &suffix) else {
        return Ok(Vec::new());
    };

    read_change_rows(conn, &sql, &params)?
        .into_iter()
        .map(|row| {
            let info = selected.iter().find(|i| i.table == row.table).ok_or_else(|| {
                StorageError::Consistency(format!("change for untracked table {}", row.table))
            })?;
            into_change(conn, info, row)
        })
        .collect()
}

fn into_change(conn: &Connection, info: &TableInfo, row: ChangeRow) -> Result<Change, EngineError> {
    let value = match row_patch_query(info, &row.cid) {
        Some(sql) => live_value(conn, &sql, &row.pks)?,
        None => None,
    };
    let site_id = row.site_id.as_deref().map(SiteId::from_slice).transpose()?;
    Ok(Change {
        table: row.table,
        pk: row.pks,
        cid: row.cid,
        value,
        col_version: row.col_version,
        db_version: row.db_version,
        site_id,
        rowid: row.rowid,
        seq: row.seq,
    })
}

/// `None` when the row no longer exists.
fn live_value(conn: &Connection, sql: &str, packed_pk: &[u8]) -> Result<Option<ColumnValue>, EngineError> {
    let params: Vec<Value> = unpack_columns(packed_pk)?.iter().map(to_value).collect();
    let mut stmt = conn.prepare_cached(sql)?;
    let value = stmt
        .query_row(rusqlite::params_from_iter(params.iter()), |row| {
            from_value_ref(row.get_ref(0)?).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
        })
        .optional()?;
    Ok(value)
}
