//! SoftPLC struct codec
//!
//! The lowest layer of the SoftPLC stack. Everything here is pure bytes:
//! fixed-width little-endian fields at caller-supplied offsets, no knowledge
//! of data blocks, functions or tasks.
//!
//! Two views are offered over the same encoding:
//!
//! - a dynamic one ([`schema::read`], [`schema::write`]) driven by a
//!   `&[Field]` list, useful for tooling that only knows a schema at runtime
//! - a static one, where [`layout!`] declares a struct and its schema in one
//!   place and implements [`Layout`] for it
//!
//! # Bounds
//!
//! No bounds checking is done beyond slice indexing. Offsets are computed by
//! the allocator above this layer; an out-of-range offset panics and points
//! at a defect in the caller.
//!
//! # Example
//!
//! ```rust
//! use softplc_codec::{schema, Field, FieldType, FieldValue};
//!
//! const RECORD: &[Field] = &[
//!     Field::new("id", FieldType::U32),
//!     Field::new("value", FieldType::F32),
//! ];
//!
//! let mut memory = vec![0u8; 16];
//! schema::write(&mut memory, 4, RECORD, &[FieldValue::U32(9), FieldValue::F32(1.0)]);
//! assert_eq!(schema::read(&memory, 4, RECORD)[0], FieldValue::U32(9));
//! assert_eq!(schema::size_of_schema(RECORD), 8);
//! ```

mod field;
mod layout;
pub mod schema;

pub use field::{read_value, write_value, FieldType, FieldValue, Primitive};
pub use layout::Layout;
pub use schema::{size_of_schema, Field};

/// Round `value` up to the next multiple of `align` (a power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + (align - 1)) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(13, 8), 16);
    }
}
