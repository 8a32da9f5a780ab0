use crrlite_core::ColumnValue;
use rusqlite::types::{Value, ValueRef};

pub fn from_value_ref(value: ValueRef<'_>) -> Result<ColumnValue, rusqlite::types::FromSqlError> {
    Ok(match value {
        ValueRef::Null => ColumnValue::Null,
        ValueRef::Integer(n) => ColumnValue::Integer(n),
        ValueRef::Real(f) => ColumnValue::Real(f),
        ValueRef::Text(t) => ColumnValue::Text(
            std::str::from_utf8(t)
                .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))?
                .to_string(),
        ),
        ValueRef::Blob(b) => ColumnValue::Blob(b.to_vec()),
    })
}

pub fn to_value(value: &ColumnValue) -> Value {
    match value {
        ColumnValue::Null => Value::Null,
        ColumnValue::Integer(n) => Value::Integer(*n),
        ColumnValue::Real(f) => Value::Real(*f),
        ColumnValue::Text(s) => Value::Text(s.clone()),
        ColumnValue::Blob(b) => Value::Blob(b.clone()),
    }
}

pub fn from_value(value: Value) -> ColumnValue {
    match value {
        Value::Null => ColumnValue::Null,
        Value::Integer(n) => ColumnValue::Integer(n),
        Value::Real(f) => ColumnValue::Real(f),
        Value::Text(s) => ColumnValue::Text(s),
        Value::Blob(b) => ColumnValue::Blob(b),
    }
}
