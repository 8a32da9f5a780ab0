//! Packed primary keys: an ordered tuple of column values encoded into one
//! comparable blob so that composite keys travel as a single changeset field.
//!
//! Layout: `count:u8`, then per column `tag:u8` followed by the payload.
//! Integers and reals are 8 big-endian bytes, text and blobs are a 4-byte
//! big-endian length followed by the raw bytes.

use crate::column_value::ColumnValue;
use crate::error::CoreError;

const TAG_NULL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_REAL: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BLOB: u8 = 4;

pub fn pack_columns(values: &[ColumnValue]) -> Result<Vec<u8>, CoreError> {
    let count: u8 = values.len().try_into().map_err(|_| {
        CoreError::InvalidData(format!("cannot pack {} columns (max 255)", values.len()))
    })?;

    let mut buf = vec![count];
    for value in values {
        match value {
            ColumnValue::Null => buf.push(TAG_NULL),
            ColumnValue::Integer(n) => {
                buf.push(TAG_INTEGER);
                buf.extend_from_slice(&n.to_be_bytes());
            }
            ColumnValue::Real(f) => {
                buf.push(TAG_REAL);
                buf.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            ColumnValue::Text(s) => {
                buf.push(TAG_TEXT);
                push_len_prefixed(&mut buf, s.as_bytes())?;
            }
            ColumnValue::Blob(b) => {
                buf.push(TAG_BLOB);
                push_len_prefixed(&mut buf, b)?;
            }
        }
    }
    Ok(buf)
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CoreError> {
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| CoreError::InvalidData("packed value exceeds 4GiB".into()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

pub fn unpack_columns(bytes: &[u8]) -> Result<Vec<ColumnValue>, CoreError> {
    let mut reader = Reader { bytes, pos: 0 };
    let count = reader.take(1)?[0] as usize;
    let mut values = Vec::with_capacity(count);

    for _ in 0..count {
        let tag = reader.take(1)?[0];
        let value = match tag {
            TAG_NULL => ColumnValue::Null,
            TAG_INTEGER => ColumnValue::Integer(i64::from_be_bytes(reader.take_array()?)),
            TAG_REAL => ColumnValue::Real(f64::from_bits(u64::from_be_bytes(reader.take_array()?))),
            TAG_TEXT => {
                let raw = reader.take_len_prefixed()?;
                let text = std::str::from_utf8(raw)
                    .map_err(|e| CoreError::InvalidData(format!("packed text: {e}")))?;
                ColumnValue::Text(text.to_string())
            }
            TAG_BLOB => ColumnValue::Blob(reader.take_len_prefixed()?.to_vec()),
            other => {
                return Err(CoreError::InvalidData(format!("unknown packed tag {other}")));
            }
        };
        values.push(value);
    }

    if reader.pos != bytes.len() {
        return Err(CoreError::InvalidData(format!(
            "{} trailing bytes after packed columns",
            bytes.len() - reader.pos
        )));
    }
    Ok(values)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CoreError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CoreError::InvalidData("truncated packed columns".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CoreError> {
        self.take(N)?
            .try_into()
            .map_err(|_| CoreError::InvalidData("truncated packed columns".into()))
    }

    fn take_len_prefixed(&mut self) -> Result<&'a [u8], CoreError> {
        let len = u32::from_be_bytes(self.take_array()?) as usize;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_survives_packing() {
        let key = vec![
            ColumnValue::Integer(-42),
            ColumnValue::Text("ünïcode".into()),
            ColumnValue::Null,
            ColumnValue::Real(1.5),
            ColumnValue::Blob(vec![0, 1, 2]),
        ];
        let packed = pack_columns(&key).unwrap();
        assert_eq!(packed[0], 5);
        assert_eq!(unpack_columns(&packed).unwrap(), key);
    }

    #[test]
    fn single_integer_layout() {
        let packed = pack_columns(&[ColumnValue::Integer(1)]).unwrap();
        assert_eq!(packed, vec![1, TAG_INTEGER, 0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let packed = pack_columns(&[ColumnValue::Text("abc".into())]).unwrap();
        let result = unpack_columns(&packed[..packed.len() - 1]);
        assert!(matches!(result, Err(CoreError::InvalidData(_))));
    }

    #[test]
    fn unknown_tag_and_trailing_bytes_are_rejected() {
        assert!(unpack_columns(&[1, 9]).is_err());
        assert!(unpack_columns(&[1, TAG_NULL, 0]).is_err());
        assert!(unpack_columns(&[]).is_err());
    }

    #[test]
    fn too_many_columns() {
        let values = vec![ColumnValue::Null; 256];
        assert!(pack_columns(&values).is_err());
    }
}
