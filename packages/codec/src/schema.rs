//! Schema-driven record access.
//!
//! A schema is an ordered list of [`Field`]s. Fields are laid out back to
//! back in declaration order with no padding.

use crate::field::{read_value, write_value, FieldType, FieldValue};

/// One named field of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

impl Field {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty }
    }
}

/// Total encoded size of a schema in bytes.
pub const fn size_of_schema(schema: &[Field]) -> usize {
    let mut size = 0;
    let mut i = 0;
    while i < schema.len() {
        size += schema[i].ty.width();
        i += 1;
    }
    size
}

/// Byte offset of the named field relative to the record start.
pub fn offset_of(schema: &[Field], name: &str) -> Option<usize> {
    let mut at = 0;
    for field in schema {
        if field.name == name {
            return Some(at);
        }
        at += field.ty.width();
    }
    None
}

/// Read every field of `schema` starting at `offset`.
pub fn read(buf: &[u8], offset: usize, schema: &[Field]) -> Vec<FieldValue> {
    let mut at = offset;
    schema
        .iter()
        .map(|field| {
            let value = read_value(buf, at, field.ty);
            at += field.ty.width();
            value
        })
        .collect()
}

/// Write `values` in schema order starting at `offset`.
///
/// Returns the number of bytes written. Panics if `values` does not match
/// the schema in length or type.
pub fn write(buf: &mut [u8], offset: usize, schema: &[Field], values: &[FieldValue]) -> usize {
    assert_eq!(
        schema.len(),
        values.len(),
        "record has {} values, schema has {} fields",
        values.len(),
        schema.len()
    );
    let mut at = offset;
    for (field, value) in schema.iter().zip(values) {
        assert_eq!(
            field.ty,
            value.field_type(),
            "field `{}` expects {}",
            field.name,
            field.ty
        );
        at += write_value(buf, at, *value);
    }
    at - offset
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &[Field] = &[
        Field::new("byte_length", FieldType::U32),
        Field::new("block_type", FieldType::U8),
        Field::new("flags", FieldType::U8),
        Field::new("parent_id", FieldType::U16),
    ];

    #[test]
    fn schema_size_is_sum_of_widths() {
        assert_eq!(size_of_schema(HEADER), 8);
        assert_eq!(size_of_schema(&[]), 0);
    }

    #[test]
    fn offsets_follow_declaration_order() {
        assert_eq!(offset_of(HEADER, "byte_length"), Some(0));
        assert_eq!(offset_of(HEADER, "flags"), Some(5));
        assert_eq!(offset_of(HEADER, "parent_id"), Some(6));
        assert_eq!(offset_of(HEADER, "missing"), None);
    }

    #[test]
    fn write_then_read() {
        let mut buf = vec![0u8; 32];
        let values = [
            FieldValue::U32(64),
            FieldValue::U8(3),
            FieldValue::U8(0),
            FieldValue::U16(9),
        ];
        assert_eq!(write(&mut buf, 12, HEADER, &values), 8);
        assert_eq!(read(&buf, 12, HEADER), values.to_vec());
    }

    #[test]
    #[should_panic(expected = "field `flags` expects uint8")]
    fn mismatched_type_panics() {
        let mut buf = vec![0u8; 8];
        let values = [
            FieldValue::U32(64),
            FieldValue::U8(3),
            FieldValue::U16(0),
            FieldValue::U16(9),
        ];
        write(&mut buf, 0, HEADER, &values);
    }
}
