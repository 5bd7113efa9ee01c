//! Item addressing
//!
//! An address locates a region of controller memory. Item identity is the
//! address tuple alone, captured once when the item is created.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressable memory class of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    Input,
    Output,
    Flags,
    Data,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Input => "Input",
            Region::Output => "Output",
            Region::Flags => "Flags",
            Region::Data => "Data",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of an item: region, data block, byte position and bit offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub region: Region,
    /// Only meaningful for [`Region::Data`], always 0 otherwise
    pub data_block: u16,
    pub position: u16,
    /// 0..=7
    pub bit_position: u8,
}

impl Address {
    /// Address in a data block
    pub fn data(data_block: u16, position: u16) -> Self {
        Self {
            region: Region::Data,
            data_block,
            position,
            bit_position: 0,
        }
    }

    /// Address in a non-data region; the data block is forced to 0
    pub fn new(region: Region, position: u16) -> Self {
        Self {
            region,
            data_block: 0,
            position,
            bit_position: 0,
        }
    }

    pub fn with_bit(mut self, bit_position: u8) -> Self {
        self.bit_position = bit_position;
        self
    }

    /// Normalise the data block for non-data regions
    pub(crate) fn normalized(mut self) -> Self {
        if self.region != Region::Data {
            self.data_block = 0;
        }
        self
    }

    /// Absolute bit offset inside the region
    pub fn bit_offset(&self) -> usize {
        self.position as usize * 8 + self.bit_position as usize
    }

    /// Address right after `bit_length` bits from here
    ///
    /// `None` if that address lies beyond the last byte position.
    pub fn advanced_by(&self, bit_length: usize) -> Option<Self> {
        let offset = self.bit_offset().checked_add(bit_length)?;
        Some(Self {
            region: self.region,
            data_block: self.data_block,
            position: u16::try_from(offset / 8).ok()?,
            bit_position: (offset % 8) as u8,
        })
    }
}

/// Identity of an item: its address plus the bit length it was created with
///
/// The key is computed once and never follows later length changes of
/// auto-adapt items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub address: Address,
    pub bit_length: usize,
}

impl ItemKey {
    /// Format the address as a PLC string
    ///
    /// `DB{n},B{pos},{byteLen}` for byte-aligned items, otherwise
    /// `DB{n},X{pos}.{bit},{bitLen}`. Non-data regions use the region name in
    /// place of `DB{n}`.
    pub fn plc_string(&self) -> String {
        plc_string(&self.address, self.bit_length)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.plc_string())
    }
}

pub(crate) fn plc_string(address: &Address, bit_length: usize) -> String {
    let area = match address.region {
        Region::Data => format!("DB{}", address.data_block),
        region => region.as_str().to_string(),
    };
    if address.bit_position == 0 && bit_length % 8 == 0 {
        format!("{},B{},{}", area, address.position, bit_length / 8)
    } else {
        format!(
            "{},X{}.{},{}",
            area, address.position, address.bit_position, bit_length
        )
    }
}
