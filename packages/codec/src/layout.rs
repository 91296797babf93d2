//! Statically described record layouts.

use crate::schema::{size_of_schema, Field};

/// A plain struct whose fields map one to one onto a schema.
///
/// Implemented by the [`layout!`](crate::layout) macro; the schema and the
/// struct definition come from the same declaration, so field order and
/// offsets cannot drift apart.
pub trait Layout: Sized {
    /// Ordered field list of the record.
    const SCHEMA: &'static [Field];

    /// Encoded size of the record in bytes.
    const SIZE: usize = size_of_schema(Self::SCHEMA);

    /// Decode the record at `offset`.
    fn read_from(buf: &[u8], offset: usize) -> Self;

    /// Encode the record at `offset`, returning the number of bytes written.
    fn write_to(&self, buf: &mut [u8], offset: usize) -> usize;
}

/// Declare a struct together with its binary layout.
///
/// ```rust
/// softplc_codec::layout! {
///     #[derive(Debug, Clone, Copy, PartialEq, Default)]
///     pub struct Sample {
///         pub id: u32,
///         pub value: f32,
///     }
/// }
///
/// use softplc_codec::Layout;
///
/// let mut buf = [0u8; 8];
/// Sample { id: 7, value: 1.5 }.write_to(&mut buf, 0);
/// assert_eq!(Sample::read_from(&buf, 0).id, 7);
/// assert_eq!(Sample::SIZE, 8);
/// ```
#[macro_export]
macro_rules! layout {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::Layout for $name {
            const SCHEMA: &'static [$crate::Field] = &[
                $(
                    $crate::Field::new(
                        stringify!($field),
                        <$ty as $crate::Primitive>::TYPE,
                    ),
                )*
            ];

            #[allow(unused_assignments)]
            fn read_from(buf: &[u8], offset: usize) -> Self {
                let mut at = offset;
                $(
                    let $field = <$ty as $crate::Primitive>::read_le(buf, at);
                    at += <$ty as $crate::Primitive>::TYPE.width();
                )*
                Self { $( $field, )* }
            }

            fn write_to(&self, buf: &mut [u8], offset: usize) -> usize {
                let mut at = offset;
                $(
                    <$ty as $crate::Primitive>::write_le(self.$field, buf, at);
                    at += <$ty as $crate::Primitive>::TYPE.width();
                )*
                at - offset
            }
        }
    };
}
