//! Typed item kinds
//!
//! Every kind is a factory returning a [`TypedItem`] built from one generic
//! item and a conversion pair. Multi-byte numbers default to big-endian,
//! which is how the controllers lay them out in memory.

use super::address::Address;
use super::typed::{ItemCodec, TypedItem};
use crate::bits::BitCollection;
use crate::error::{PlcError, Result};
use serde::{Deserialize, Serialize};

/// Byte order of multi-byte values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Closed set of widths supported by the numeric family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericWidth {
    One,
    Two,
    Four,
    Eight,
}

impl NumericWidth {
    pub fn bytes(self) -> usize {
        match self {
            NumericWidth::One => 1,
            NumericWidth::Two => 2,
            NumericWidth::Four => 4,
            NumericWidth::Eight => 8,
        }
    }

    /// Largest value representable in this width
    pub fn max_value(self) -> u64 {
        match self {
            NumericWidth::Eight => u64::MAX,
            width => (1u64 << (width.bytes() * 8)) - 1,
        }
    }
}

impl TryFrom<usize> for NumericWidth {
    type Error = PlcError;

    fn try_from(width: usize) -> Result<Self> {
        match width {
            1 => Ok(NumericWidth::One),
            2 => Ok(NumericWidth::Two),
            4 => Ok(NumericWidth::Four),
            8 => Ok(NumericWidth::Eight),
            width => Err(PlcError::UnsupportedWidth { width }),
        }
    }
}

/// First `N` bytes of the collection, zero-padded
fn leading<const N: usize>(bits: &BitCollection) -> [u8; N] {
    let mut out = [0u8; N];
    for (dst, src) in out.iter_mut().zip(bits.to_bytes()) {
        *dst = src;
    }
    out
}

fn ordered<const N: usize>(mut bytes: [u8; N], order: ByteOrder) -> [u8; N] {
    if order == ByteOrder::LittleEndian {
        bytes.reverse();
    }
    bytes
}

/// Single bit
pub fn bit(identifier: Option<&str>, address: Address) -> Result<TypedItem<bool>> {
    let codec = ItemCodec::new(
        |bits: &BitCollection| bits.get(0).unwrap_or(false),
        |value: &bool| BitCollection::from_bools(&[*value], false),
    );
    TypedItem::new(identifier, address, 1, false, codec)
}

/// Single byte
pub fn byte(identifier: Option<&str>, address: Address) -> Result<TypedItem<u8>> {
    let codec = ItemCodec::new(
        |bits: &BitCollection| leading::<1>(bits)[0],
        |value: &u8| BitCollection::from_bytes(&[*value], false),
    );
    TypedItem::new(identifier, address, 8, false, codec)
}

/// Fixed-length raw bytes; shorter values are zero-padded, longer truncated
pub fn bytes(identifier: Option<&str>, address: Address, len: usize) -> Result<TypedItem<Vec<u8>>> {
    let codec = ItemCodec::new(
        |bits: &BitCollection| bits.to_bytes(),
        |value: &Vec<u8>| BitCollection::from_bytes(value, false),
    )
    .with_validator(move |mut value: Vec<u8>| {
        value.resize(len, 0);
        value
    });
    TypedItem::new(identifier, address, len * 8, false, codec)
}

macro_rules! numeric_kind {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $n:literal) => {
        $(#[$meta])*
        pub fn $name(
            identifier: Option<&str>,
            address: Address,
            order: ByteOrder,
        ) -> Result<TypedItem<$ty>> {
            let codec = ItemCodec::new(
                move |bits: &BitCollection| {
                    <$ty>::from_be_bytes(ordered(leading::<$n>(bits), order))
                },
                move |value: &$ty| {
                    BitCollection::from_bytes(&ordered(value.to_be_bytes(), order), false)
                },
            );
            TypedItem::new(identifier, address, $n * 8, false, codec)
        }
    };
}

numeric_kind!(
    /// Signed 16-bit word
    int16, i16, 2
);
numeric_kind!(
    /// Unsigned 16-bit word
    uint16, u16, 2
);
numeric_kind!(
    /// Signed 32-bit double word
    int32, i32, 4
);
numeric_kind!(
    /// Unsigned 32-bit double word
    uint32, u32, 4
);
numeric_kind!(
    /// Signed 64-bit long word
    int64, i64, 8
);
numeric_kind!(
    /// Unsigned 64-bit long word
    uint64, u64, 8
);
numeric_kind!(
    /// IEEE 754 single precision
    float32, f32, 4
);
numeric_kind!(
    /// IEEE 754 double precision
    float64, f64, 8
);

/// Unsigned number of `width` bytes (1, 2, 4 or 8), big-endian
///
/// Values above the width's capacity saturate at its maximum.
pub fn numeric(identifier: Option<&str>, address: Address, width: usize) -> Result<TypedItem<u64>> {
    let width = NumericWidth::try_from(width)?;
    let len = width.bytes();
    let max = width.max_value();
    let codec = ItemCodec::new(
        move |bits: &BitCollection| decode_unsigned(&bits.to_bytes(), len),
        move |value: &u64| BitCollection::from_bytes(&value.to_be_bytes()[8 - len..], false),
    )
    .with_validator(move |value: u64| value.min(max));
    TypedItem::new(identifier, address, len * 8, false, codec)
}

fn decode_unsigned(bytes: &[u8], len: usize) -> u64 {
    (0..len).fold(0u64, |acc, i| {
        (acc << 8) | u64::from(bytes.get(i).copied().unwrap_or(0))
    })
}

/// Fixed-width text of `len` bytes
///
/// Values are truncated to `len` bytes on a character boundary and padded
/// with NUL. Reading stops at the first NUL.
pub fn text(identifier: Option<&str>, address: Address, len: usize) -> Result<TypedItem<String>> {
    let codec = ItemCodec::new(
        |bits: &BitCollection| decode_text(&bits.to_bytes()),
        move |value: &String| {
            let mut data = value.as_bytes().to_vec();
            data.resize(len, 0);
            BitCollection::from_bytes(&data, false)
        },
    )
    .with_validator(move |value: String| truncate_utf8(value, len));
    TypedItem::new(identifier, address, len * 8, false, codec)
}

fn decode_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn truncate_utf8(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut cut = max;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
    }
    value
}

/// Raw bytes whose length follows the data (starts empty)
pub fn flexible_bytes(identifier: Option<&str>, address: Address) -> Result<TypedItem<Vec<u8>>> {
    let codec = ItemCodec::new(
        |bits: &BitCollection| bits.to_bytes(),
        |value: &Vec<u8>| BitCollection::from_bytes(value, true),
    );
    TypedItem::new(identifier, address, 0, true, codec)
}

/// UTF-8 text whose length follows the data (starts empty)
pub fn flexible_text(identifier: Option<&str>, address: Address) -> Result<TypedItem<String>> {
    let codec = ItemCodec::new(
        |bits: &BitCollection| decode_text(&bits.to_bytes()),
        |value: &String| BitCollection::from_bytes(value.as_bytes(), true),
    );
    TypedItem::new(identifier, address, 0, true, codec)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn at(position: u16) -> Address {
        Address::data(1, position)
    }

    #[test]
    fn test_uint16_big_endian_layout() {
        let item = uint16(None, at(0), ByteOrder::BigEndian).unwrap();
        item.set_value(0x1234).unwrap();
        assert_eq!(item.bits().to_bytes(), vec![0x12, 0x34]);

        item.bits().transfer_from_bytes(&[0xAB, 0xCD], 0).unwrap();
        assert_eq!(item.value(), 0xABCD);
    }

    #[test]
    fn test_int32_little_endian_layout() {
        let item = int32(None, at(0), ByteOrder::LittleEndian).unwrap();
        item.set_value(-2).unwrap();
        assert_eq!(item.bits().to_bytes(), vec![0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(item.value(), -2);
    }

    #[test]
    fn test_signed_kinds_keep_sign() {
        let short = int16(None, at(0), ByteOrder::BigEndian).unwrap();
        short.set_value(i16::MIN).unwrap();
        assert_eq!(short.bits().to_bytes(), vec![0x80, 0x00]);
        assert_eq!(short.value(), i16::MIN);

        let long = int64(None, at(0), ByteOrder::LittleEndian).unwrap();
        long.set_value(-1).unwrap();
        assert_eq!(long.bits().to_bytes(), vec![0xFF; 8]);
        assert_eq!(long.value(), -1);

        let unsigned = uint64(None, at(0), ByteOrder::BigEndian).unwrap();
        unsigned.set_value(u64::MAX - 1).unwrap();
        assert_eq!(unsigned.bits().to_bytes()[7], 0xFE);
        assert_eq!(unsigned.value(), u64::MAX - 1);
    }

    #[test]
    fn test_float_kinds() {
        let single = float32(None, at(0), ByteOrder::BigEndian).unwrap();
        single.set_value(1.5).unwrap();
        assert_eq!(single.bits().to_bytes(), 1.5f32.to_be_bytes().to_vec());
        assert_eq!(single.value(), 1.5);

        let double = float64(None, at(8), ByteOrder::BigEndian).unwrap();
        double.set_value(-0.25).unwrap();
        assert_eq!(double.value(), -0.25);
        assert_eq!(double.bits().len(), 64);
    }

    #[test]
    fn test_bit_kind() {
        let item = bit(Some("pump.on"), Address::data(3, 1).with_bit(5)).unwrap();
        assert_eq!(item.item().plc_string(), "DB3,X1.5,1");
        item.set_value(true).unwrap();
        assert!(item.value());
        assert_eq!(item.bits().to_bools(), vec![true]);
    }

    #[test]
    fn test_numeric_widths() {
        for (width, expected_bits) in [(1, 8), (2, 16), (4, 32), (8, 64)] {
            let item = numeric(None, at(0), width).unwrap();
            assert_eq!(item.bits().len(), expected_bits);
        }
    }

    #[test]
    fn test_numeric_rejects_unsupported_width() {
        for width in [0, 3, 5, 16] {
            let err = numeric(None, at(0), width).unwrap_err();
            assert!(matches!(err, PlcError::UnsupportedWidth { width: w } if w == width));
        }
    }

    #[test]
    fn test_numeric_saturates() {
        let item = numeric(None, at(0), 1).unwrap();
        item.set_value(300).unwrap();
        assert_eq!(item.value(), 255);

        let item = numeric(None, at(0), 2).unwrap();
        item.set_value(0x0102).unwrap();
        assert_eq!(item.bits().to_bytes(), vec![0x01, 0x02]);
        assert_eq!(item.value(), 0x0102);
    }

    #[test]
    fn test_bytes_pads_and_truncates() {
        let item = bytes(None, at(0), 4).unwrap();
        item.set_value(vec![1, 2]).unwrap();
        assert_eq!(item.value(), vec![1, 2, 0, 0]);
        item.set_value(vec![9, 8, 7, 6, 5]).unwrap();
        assert_eq!(item.value(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_text_fixed_width() {
        let item = text(None, at(0), 6).unwrap();
        item.set_value("pump".to_string()).unwrap();
        assert_eq!(item.bits().to_bytes(), b"pump\0\0".to_vec());
        assert_eq!(item.value(), "pump");

        item.set_value("überlang".to_string()).unwrap();
        assert_eq!(item.value(), "überl");
    }

    #[test]
    fn test_flexible_kinds_follow_data() {
        let raw = flexible_bytes(None, at(0)).unwrap();
        assert!(raw.bits().is_empty());
        raw.set_value(vec![1, 2, 3]).unwrap();
        assert_eq!(raw.bits().byte_len(), 3);
        raw.set_value(vec![4]).unwrap();
        assert_eq!(raw.value(), vec![4]);

        let txt = flexible_text(None, at(0)).unwrap();
        txt.set_value("hello".to_string()).unwrap();
        assert_eq!(txt.bits().byte_len(), 5);
        assert_eq!(txt.value(), "hello");
    }

    #[test]
    fn test_width_capacity() {
        assert_eq!(NumericWidth::One.max_value(), 0xFF);
        assert_eq!(NumericWidth::Four.max_value(), 0xFFFF_FFFF);
        assert_eq!(NumericWidth::Eight.max_value(), u64::MAX);
    }
}
