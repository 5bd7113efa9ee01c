//! Untyped PLC item: an address plus the bits stored there

use super::address::{plc_string, Address, ItemKey};
use crate::bits::BitCollection;
use crate::error::{PlcError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A region of controller memory and its current content
///
/// Equality and hashing use the [`ItemKey`] captured at construction, never
/// the content, so two items at the same address with the same length are
/// equal whatever their values are.
pub struct PlcItem {
    identifier: String,
    key: ItemKey,
    bits: BitCollection,
}

impl PlcItem {
    /// Create an item owning `bits`
    ///
    /// Without an identifier the PLC string of the address is used.
    pub fn new(identifier: Option<&str>, address: Address, bits: BitCollection) -> Result<Self> {
        if address.bit_position > 7 {
            return Err(PlcError::invalid_item(format!(
                "bit position {} out of range 0..=7",
                address.bit_position
            )));
        }
        let address = address.normalized();
        let key = ItemKey {
            address,
            bit_length: bits.len(),
        };
        let identifier = match identifier {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => key.plc_string(),
        };
        Ok(Self {
            identifier,
            key,
            bits,
        })
    }

    /// Create an item of `bit_length` cleared bits
    pub fn with_length(
        identifier: Option<&str>,
        address: Address,
        bit_length: usize,
        auto_adapt: bool,
    ) -> Result<Self> {
        Self::new(
            identifier,
            address,
            BitCollection::new(bit_length, auto_adapt),
        )
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn key(&self) -> ItemKey {
        self.key
    }

    pub fn address(&self) -> Address {
        self.key.address
    }

    pub fn bits(&self) -> &BitCollection {
        &self.bits
    }

    /// Current length in bits (may differ from the key for auto-adapt items)
    pub fn bit_length(&self) -> usize {
        self.bits.len()
    }

    /// PLC string of the current address and length
    pub fn plc_string(&self) -> String {
        plc_string(&self.key.address, self.bits.len())
    }

    /// Independent copy with the same identity and a deep-copied buffer
    pub fn duplicate(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            key: self.key,
            bits: self.bits.clone(),
        }
    }
}

impl PartialEq for PlcItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for PlcItem {}

impl Hash for PlcItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for PlcItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlcItem")
            .field("identifier", &self.identifier)
            .field("address", &self.plc_string())
            .finish()
    }
}

impl fmt::Display for PlcItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier, self.plc_string())
    }
}
