use serde::{Deserialize, Serialize};

use crate::column_value::ColumnValue;
use crate::consts::is_sentinel;
use crate::error::CoreError;
use crate::ids::SiteId;
use crate::pack::unpack_columns;

/// One row of the change stream: the version metadata of a single
/// (row, column) pair plus the column's current value, if it has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub table: String,
    /// Packed primary key, see [`crate::pack`].
    pub pk: Vec<u8>,
    pub cid: String,
    pub value: Option<ColumnValue>,
    pub col_version: i64,
    pub db_version: i64,
    /// `None` for changes made locally.
    pub site_id: Option<SiteId>,
    pub rowid: i64,
    pub seq: i64,
}

impl Change {
    pub fn is_sentinel(&self) -> bool {
        is_sentinel(&self.cid)
    }

    pub fn primary_key(&self) -> Result<Vec<ColumnValue>, CoreError> {
        unpack_columns(&self.pk)
    }
}

/// A batch of changes as shipped to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub site_id: SiteId,
    pub changes: Vec<Change>,
}

impl Changeset {
    /// Highest db_version in the batch; peers resume from here.
    pub fn max_db_version(&self) -> Option<i64> {
        self.changes.iter().map(|c| c.db_version).max()
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
