//! Wire-level primitives shared by the binary encoder and decoder.

use crate::DecodeError;

pub mod varint;
pub use varint::{decode_varint, decode_zigzag, encode_varint, encode_zigzag, encoded_len_varint};

/// Binary wire data types. The low nibble of every field header byte carries
/// one of these codes; `End` terminates a struct value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    End = 0,
    Zero = 1,
    One = 2,
    Varint = 3,
    Fixed16 = 4,
    Fixed32 = 5,
    Fixed64 = 6,
    Float = 7,
    Double = 8,
    Bytes = 9,
    List = 10,
    PList = 11,
    Map = 12,
    Struct = 13,
    Subtype = 14,
}

/// Extended marker for a back-reference to a shared object, valid only in
/// collection-element position. The END type nibble with a nonzero delta can
/// never be produced by a field header, so the byte is unambiguous there.
pub const SHARED_REF: u8 = 0x10;

/// Largest field-id delta expressible in a single header byte.
pub const MAX_DELTA: u32 = 15;

impl TryFrom<u8> for DataType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<DataType, DecodeError> {
        match value {
            0 => Ok(DataType::End),
            1 => Ok(DataType::Zero),
            2 => Ok(DataType::One),
            3 => Ok(DataType::Varint),
            4 => Ok(DataType::Fixed16),
            5 => Ok(DataType::Fixed32),
            6 => Ok(DataType::Fixed64),
            7 => Ok(DataType::Float),
            8 => Ok(DataType::Double),
            9 => Ok(DataType::Bytes),
            10 => Ok(DataType::List),
            11 => Ok(DataType::PList),
            12 => Ok(DataType::Map),
            13 => Ok(DataType::Struct),
            14 => Ok(DataType::Subtype),
            _ => Err(DecodeError::new(format!(
                "invalid wire data type value: {}",
                value
            ))),
        }
    }
}

impl DataType {
    /// Width in bytes of a packed (`PLIST`) element of this type, if the type
    /// is packable.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            DataType::Fixed16 => Some(2),
            DataType::Fixed32 | DataType::Float => Some(4),
            DataType::Fixed64 | DataType::Double => Some(8),
            _ => None,
        }
    }
}
