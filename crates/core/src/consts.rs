//! Well-known names shared by the generated SQL and its readers. Peers
//! interpret clock rows by these names, so they are part of the wire contract.

pub const SITE_ID_LEN: usize = 16;

pub const CLOCK_TABLE_SUFFIX: &str = "__crsql_clock";
pub const INSERT_TRIGGER_SUFFIX: &str = "__crsql_itrig";
pub const UPDATE_TRIGGER_SUFFIX: &str = "__crsql_utrig";
pub const DELETE_TRIGGER_SUFFIX: &str = "__crsql_dtrig";

/// Column name recorded for tables that have no non-key columns.
pub const PKS_ONLY_SENTINEL: &str = "__crsql_pko";

/// Column name of the causal-length (row lifecycle) clock row.
pub const CAUSAL_LENGTH_SENTINEL: &str = "__crsql_cl";

pub const INTERNAL_PREFIX: &str = "__crsql";
pub const SITE_ID_TABLE: &str = "__crsql_siteid";
pub const MASTER_TABLE: &str = "crsql_master";
pub const PRE_COMPACT_DBVERSION_KEY: &str = "pre_compact_dbversion";

pub const CHANGES_VIEW: &str = "crsql_changes";

pub fn clock_table_name(table: &str) -> String {
    format!("{table}{CLOCK_TABLE_SUFFIX}")
}

pub fn is_sentinel(col_name: &str) -> bool {
    col_name == PKS_ONLY_SENTINEL || col_name == CAUSAL_LENGTH_SENTINEL
}
