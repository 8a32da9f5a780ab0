pub mod change;
pub mod column_value;
pub mod consts;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod pack;

pub use change::{Change, Changeset};
pub use column_value::ColumnValue;
pub use error::CoreError;
pub use ids::SiteId;
pub use lifecycle::{Lifecycle, RowEvent};
