//! Length-prefixed items
//!
//! A dynamic item is a numeric length item immediately followed by a
//! flexible (auto-adapt) item. The flexible byte length always equals the
//! length item's value: changing either side updates the other, and only
//! when the derived value actually differs, so the two never ping-pong.

use super::address::{Address, ItemKey};
use super::kinds::{self, NumericWidth};
use super::typed::TypedItem;
use crate::error::{PlcError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::warn;

/// Addressable bytes per region (positions 0..=65535)
const REGION_BYTES: usize = u16::MAX as usize + 1;

/// Composite of a length item and the flexible item it describes
pub struct DynamicItem<T> {
    length: TypedItem<u64>,
    flexible: TypedItem<T>,
}

impl<T> DynamicItem<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Build a dynamic item at `address`
    ///
    /// The length item takes `length_width` bytes (1, 2 or 4); `make_flexible`
    /// receives the identifier and address of the flexible part and must
    /// return an auto-adapt item.
    pub fn new<F>(
        identifier: Option<&str>,
        address: Address,
        length_width: usize,
        make_flexible: F,
    ) -> Result<Self>
    where
        F: FnOnce(Option<&str>, Address) -> Result<TypedItem<T>>,
    {
        if address.bit_position != 0 {
            return Err(PlcError::invalid_item(
                "dynamic items must start on a byte boundary",
            ));
        }
        let width = NumericWidth::try_from(length_width)?;
        if width == NumericWidth::Eight {
            return Err(PlcError::invalid_item(
                "dynamic length width must be 1, 2 or 4 bytes",
            ));
        }

        let base = match identifier {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => ItemKey {
                address: address.normalized(),
                bit_length: width.bytes() * 8,
            }
            .plc_string(),
        };
        let length_id = format!("{base}.Length");
        let value_id = format!("{base}.Value");

        let value_address = address.advanced_by(width.bytes() * 8).ok_or_else(|| {
            PlcError::invalid_item(format!("no room for the data of {base} after its length"))
        })?;
        let length = kinds::numeric(Some(&length_id), address, width.bytes())?;
        let flexible = make_flexible(Some(&value_id), value_address)?;
        if !flexible.bits().is_auto_adapt() {
            return Err(PlcError::invalid_item(format!(
                "flexible part of {base} must be auto-adapt"
            )));
        }

        // Data cannot run past the last byte position of the region.
        let capacity = REGION_BYTES - value_address.position as usize;
        let target = Arc::downgrade(flexible.item());
        length.on_change(move |change| {
            let Some(flexible) = target.upgrade() else {
                return;
            };
            let mut wanted = usize::try_from(change.new).unwrap_or(usize::MAX);
            if wanted > capacity {
                warn!(
                    item = %flexible.identifier(),
                    length = change.new,
                    capacity,
                    "Length exceeds the region, data clamped"
                );
                wanted = capacity;
            }
            if flexible.bits().byte_len() != wanted {
                let _ = flexible.bits().resize(wanted * 8);
            }
        });

        let source = length.clone();
        let max = width.max_value();
        flexible.bits().subscribe(move |bits, _| {
            let actual = bits.byte_len() as u64;
            if source.value() == actual {
                return;
            }
            if actual > max {
                warn!(
                    item = %source.identifier(),
                    length = actual,
                    max,
                    "Flexible data exceeds length width, length saturated"
                );
            }
            let _ = source.set_value(actual);
        });

        Ok(Self { length, flexible })
    }

    /// Value of the flexible part
    pub fn value(&self) -> T {
        self.flexible.value()
    }

    /// Set the flexible part; the length item follows
    pub fn set_value(&self, value: T) -> Result<()> {
        self.flexible.set_value(value)
    }

    /// Current length as held by the length item
    pub fn len(&self) -> u64 {
        self.length.value()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DynamicItem<Vec<u8>> {
    /// Length-prefixed raw bytes
    pub fn bytes(identifier: Option<&str>, address: Address, length_width: usize) -> Result<Self> {
        Self::new(identifier, address, length_width, kinds::flexible_bytes)
    }
}

impl DynamicItem<String> {
    /// Length-prefixed text
    pub fn text(identifier: Option<&str>, address: Address, length_width: usize) -> Result<Self> {
        Self::new(identifier, address, length_width, kinds::flexible_text)
    }
}

impl<T> DynamicItem<T> {
    pub fn length_item(&self) -> &TypedItem<u64> {
        &self.length
    }

    pub fn flexible_item(&self) -> &TypedItem<T> {
        &self.flexible
    }

    /// Identity of the composite (the length item's identity)
    pub fn key(&self) -> ItemKey {
        self.length.key()
    }
}

impl<T> Clone for DynamicItem<T> {
    fn clone(&self) -> Self {
        Self {
            length: self.length.clone(),
            flexible: self.flexible.clone(),
        }
    }
}

impl<T> PartialEq for DynamicItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length
    }
}

impl<T> Eq for DynamicItem<T> {}

impl<T> Hash for DynamicItem<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.length.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for DynamicItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicItem")
            .field("length", &self.length)
            .field("flexible", &self.flexible)
            .finish()
    }
}
