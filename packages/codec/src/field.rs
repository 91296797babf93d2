//! Primitive field types and their little-endian encodings.

use bytes::{Buf, BufMut};

/// The primitive types a record field can have.
///
/// Every type has a fixed width; there is no padding between fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl FieldType {
    /// Width of the encoded field in bytes.
    pub const fn width(self) -> usize {
        match self {
            FieldType::I8 | FieldType::U8 => 1,
            FieldType::I16 | FieldType::U16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::F64 => 8,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::I8 => "int8",
            FieldType::U8 => "uint8",
            FieldType::I16 => "int16",
            FieldType::U16 => "uint16",
            FieldType::I32 => "int32",
            FieldType::U32 => "uint32",
            FieldType::F32 => "float32",
            FieldType::F64 => "float64",
        };
        write!(f, "{}", name)
    }
}

/// A dynamically typed field value, used by the schema-driven API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
}

impl FieldValue {
    /// The type tag of this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::I8(_) => FieldType::I8,
            FieldValue::U8(_) => FieldType::U8,
            FieldValue::I16(_) => FieldType::I16,
            FieldValue::U16(_) => FieldType::U16,
            FieldValue::I32(_) => FieldType::I32,
            FieldValue::U32(_) => FieldType::U32,
            FieldValue::F32(_) => FieldType::F32,
            FieldValue::F64(_) => FieldType::F64,
        }
    }

    /// Widen the value to `f64` (lossless for every supported type).
    pub fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::I8(v) => v as f64,
            FieldValue::U8(v) => v as f64,
            FieldValue::I16(v) => v as f64,
            FieldValue::U16(v) => v as f64,
            FieldValue::I32(v) => v as f64,
            FieldValue::U32(v) => v as f64,
            FieldValue::F32(v) => v as f64,
            FieldValue::F64(v) => v,
        }
    }
}

/// A Rust type that maps onto one [`FieldType`].
///
/// Reads and writes panic when `offset + width` exceeds the buffer. Offsets
/// are computed by the caller, so an out-of-range access is a caller defect.
pub trait Primitive: Copy {
    const TYPE: FieldType;

    fn read_le(buf: &[u8], offset: usize) -> Self;

    fn write_le(self, buf: &mut [u8], offset: usize);

    fn into_value(self) -> FieldValue;
}

macro_rules! impl_primitive {
    ($ty:ty, $variant:ident, $get:ident, $put:ident) => {
        impl Primitive for $ty {
            const TYPE: FieldType = FieldType::$variant;

            fn read_le(buf: &[u8], offset: usize) -> Self {
                let mut src = &buf[offset..offset + Self::TYPE.width()];
                src.$get()
            }

            fn write_le(self, buf: &mut [u8], offset: usize) {
                let mut dst = &mut buf[offset..offset + Self::TYPE.width()];
                dst.$put(self);
            }

            fn into_value(self) -> FieldValue {
                FieldValue::$variant(self)
            }
        }

        impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                FieldValue::$variant(value)
            }
        }
    };
}

impl_primitive!(i8, I8, get_i8, put_i8);
impl_primitive!(u8, U8, get_u8, put_u8);
impl_primitive!(i16, I16, get_i16_le, put_i16_le);
impl_primitive!(u16, U16, get_u16_le, put_u16_le);
impl_primitive!(i32, I32, get_i32_le, put_i32_le);
impl_primitive!(u32, U32, get_u32_le, put_u32_le);
impl_primitive!(f32, F32, get_f32_le, put_f32_le);
impl_primitive!(f64, F64, get_f64_le, put_f64_le);

/// Read a single value of the given type.
pub fn read_value(buf: &[u8], offset: usize, ty: FieldType) -> FieldValue {
    match ty {
        FieldType::I8 => i8::read_le(buf, offset).into(),
        FieldType::U8 => u8::read_le(buf, offset).into(),
        FieldType::I16 => i16::read_le(buf, offset).into(),
        FieldType::U16 => u16::read_le(buf, offset).into(),
        FieldType::I32 => i32::read_le(buf, offset).into(),
        FieldType::U32 => u32::read_le(buf, offset).into(),
        FieldType::F32 => f32::read_le(buf, offset).into(),
        FieldType::F64 => f64::read_le(buf, offset).into(),
    }
}

/// Write a single value, returning the number of bytes written.
pub fn write_value(buf: &mut [u8], offset: usize, value: FieldValue) -> usize {
    match value {
        FieldValue::I8(v) => v.write_le(buf, offset),
        FieldValue::U8(v) => v.write_le(buf, offset),
        FieldValue::I16(v) => v.write_le(buf, offset),
        FieldValue::U16(v) => v.write_le(buf, offset),
        FieldValue::I32(v) => v.write_le(buf, offset),
        FieldValue::U32(v) => v.write_le(buf, offset),
        FieldValue::F32(v) => v.write_le(buf, offset),
        FieldValue::F64(v) => v.write_le(buf, offset),
    }
    value.field_type().width()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(FieldType::U8.width(), 1);
        assert_eq!(FieldType::I16.width(), 2);
        assert_eq!(FieldType::F32.width(), 4);
        assert_eq!(FieldType::F64.width(), 8);
    }

    #[test]
    fn little_endian_layout() {
        let mut buf = [0u8; 4];
        0x0403_0201u32.write_le(&mut buf, 0);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(u16::read_le(&buf, 2), 0x0403);
    }

    #[test]
    fn primitive_round_trips() {
        let mut buf = [0u8; 16];

        (-5i8).write_le(&mut buf, 1);
        assert_eq!(i8::read_le(&buf, 1), -5);

        (-1234i16).write_le(&mut buf, 3);
        assert_eq!(i16::read_le(&buf, 3), -1234);

        u16::MAX.write_le(&mut buf, 5);
        assert_eq!(u16::read_le(&buf, 5), u16::MAX);

        i32::MIN.write_le(&mut buf, 7);
        assert_eq!(i32::read_le(&buf, 7), i32::MIN);

        0.1f32.write_le(&mut buf, 0);
        assert_eq!(f32::read_le(&buf, 0), 0.1f32);

        std::f64::consts::PI.write_le(&mut buf, 8);
        assert_eq!(f64::read_le(&buf, 8), std::f64::consts::PI);
    }

    #[test]
    fn dynamic_values_round_trip() {
        let mut buf = [0u8; 8];
        let written = write_value(&mut buf, 2, FieldValue::U32(77));
        assert_eq!(written, 4);
        assert_eq!(read_value(&buf, 2, FieldType::U32), FieldValue::U32(77));
        assert_eq!(FieldValue::U32(77).as_f64(), 77.0);
    }

    #[test]
    #[should_panic]
    fn out_of_range_read_panics() {
        let buf = [0u8; 3];
        let _ = u32::read_le(&buf, 0);
    }

    #[test]
    fn display_uses_schema_names() {
        assert_eq!(FieldType::F32.to_string(), "float32");
        assert_eq!(FieldType::U16.to_string(), "uint16");
    }
}
