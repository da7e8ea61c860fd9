//! Declarative schema macros.
//!
//! Every record on the wire is described once. Field codecs, opcode tables
//! and the dispatch enums are all generated from that description.

/// A struct whose wire encoding is its fields in declaration order.
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::codec::WireEncode for $name {
            fn wire_size(&self) -> usize {
                0 $( + $crate::codec::WireEncode::wire_size(&self.$field) )*
            }

            #[allow(unused_variables)]
            fn encode(&self, w: &mut $crate::codec::Writer<'_>) {
                $( $crate::codec::WireEncode::encode(&self.$field, w); )*
            }
        }

        impl $crate::codec::WireDecode for $name {
            const MIN_WIRE_SIZE: usize =
                0 $( + <$ty as $crate::codec::WireDecode>::MIN_WIRE_SIZE )*;

            #[allow(unused_variables)]
            fn decode(
                r: &mut $crate::codec::Reader<'_>,
            ) -> Result<Self, $crate::error::DecodeError> {
                Ok(Self {
                    $( $field: $crate::codec::WireDecode::decode(r)?, )*
                })
            }
        }
    };
}

/// A `u32`-discriminant enum. Unknown discriminants fail to decode.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )*
        }

        impl $name {
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )* ];

            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $( $value => Some(Self::$variant), )*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant), )*
                }
            }
        }

        impl $crate::codec::WireEncode for $name {
            fn wire_size(&self) -> usize {
                4
            }

            fn encode(&self, w: &mut $crate::codec::Writer<'_>) {
                w.put_u32(*self as u32);
            }
        }

        impl $crate::codec::WireDecode for $name {
            const MIN_WIRE_SIZE: usize = 4;

            fn decode(
                r: &mut $crate::codec::Reader<'_>,
            ) -> Result<Self, $crate::error::DecodeError> {
                let value = r.read_u32()?;
                Self::from_u32(value).ok_or($crate::error::DecodeError::InvalidEnum {
                    what: stringify!($name),
                    value,
                })
            }
        }
    };
}

/// Codec for `bitflags` sets. Unknown bits are retained.
macro_rules! wire_flags {
    ($($name:ident),* $(,)?) => {
        $(
            impl $crate::codec::WireEncode for $name {
                fn wire_size(&self) -> usize {
                    4
                }

                fn encode(&self, w: &mut $crate::codec::Writer<'_>) {
                    w.put_u32(self.bits());
                }
            }

            impl $crate::codec::WireDecode for $name {
                const MIN_WIRE_SIZE: usize = 4;

                fn decode(
                    r: &mut $crate::codec::Reader<'_>,
                ) -> Result<Self, $crate::error::DecodeError> {
                    Ok(Self::from_bits_retain(r.read_u32()?))
                }
            }
        )*
    };
}

/// A closed message family: one struct per record, an opcode enum, and a
/// dispatch enum implementing [`crate::codec::WireMessage`].
macro_rules! wire_messages {
    (
        $(#[$emeta:meta])*
        pub enum $enum_name:ident : $opcode_enum:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $code:literal {
                    $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
                }
            ),* $(,)?
        }
    ) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $opcode_enum {
            $( $variant = $code, )*
        }

        impl $opcode_enum {
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )* ];

            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $( $code => Some(Self::$variant), )*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant), )*
                }
            }
        }

        $(
            wire_struct! {
                $(#[$vmeta])*
                pub struct $variant {
                    $( $(#[$fmeta])* pub $field: $ty, )*
                }
            }

            impl $variant {
                pub const OPCODE: $opcode_enum = $opcode_enum::$variant;
            }

            impl From<$variant> for $enum_name {
                fn from(v: $variant) -> Self {
                    Self::$variant(v)
                }
            }
        )*

        $(#[$emeta])*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $enum_name {
            $( $variant($variant), )*
        }

        impl $enum_name {
            pub fn opcode(&self) -> $opcode_enum {
                match self {
                    $( Self::$variant(_) => $opcode_enum::$variant, )*
                }
            }
        }

        impl $crate::codec::WireMessage for $enum_name {
            fn opcode_u32(&self) -> u32 {
                self.opcode() as u32
            }

            fn body_size(&self) -> usize {
                match self {
                    $( Self::$variant(v) => $crate::codec::WireEncode::wire_size(v), )*
                }
            }

            fn encode_body(&self, w: &mut $crate::codec::Writer<'_>) {
                match self {
                    $( Self::$variant(v) => $crate::codec::WireEncode::encode(v, w), )*
                }
            }

            fn decode_body(
                opcode: u32,
                r: &mut $crate::codec::Reader<'_>,
            ) -> Result<Self, $crate::error::DecodeError> {
                match $opcode_enum::from_u32(opcode) {
                    $(
                        Some($opcode_enum::$variant) => {
                            Ok(Self::$variant($crate::codec::WireDecode::decode(r)?))
                        }
                    )*
                    None => Err($crate::error::DecodeError::UnknownOpcode(opcode)),
                }
            }
        }
    };
}
