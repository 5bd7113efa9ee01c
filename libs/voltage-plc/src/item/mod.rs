//! Item model: addressing, raw items, typed and dynamic items

mod address;
mod dynamic;
pub mod kinds;
mod raw;
mod typed;

pub use address::{Address, ItemKey, Region};
pub use dynamic::DynamicItem;
pub use kinds::{ByteOrder, NumericWidth};
pub use raw::PlcItem;
pub use typed::{ItemCodec, TypedItem, ValueChange, ValueSubscription};

use std::sync::Arc;

/// One entry of a read/write request
///
/// Dynamic items travel as their two parts so the engine can split the
/// transfer into two phases.
#[derive(Debug, Clone)]
pub enum RequestItem {
    Plain(Arc<PlcItem>),
    Dynamic {
        length: Arc<PlcItem>,
        flexible: Arc<PlcItem>,
    },
}

impl RequestItem {
    /// Every underlying item of this request entry
    pub fn items(&self) -> Vec<Arc<PlcItem>> {
        match self {
            RequestItem::Plain(item) => vec![item.clone()],
            RequestItem::Dynamic { length, flexible } => vec![length.clone(), flexible.clone()],
        }
    }
}

impl From<Arc<PlcItem>> for RequestItem {
    fn from(item: Arc<PlcItem>) -> Self {
        RequestItem::Plain(item)
    }
}

impl From<&Arc<PlcItem>> for RequestItem {
    fn from(item: &Arc<PlcItem>) -> Self {
        RequestItem::Plain(item.clone())
    }
}

impl<T> From<&TypedItem<T>> for RequestItem {
    fn from(item: &TypedItem<T>) -> Self {
        RequestItem::Plain(item.item().clone())
    }
}

impl<T> From<&DynamicItem<T>> for RequestItem {
    fn from(item: &DynamicItem<T>) -> Self {
        RequestItem::Dynamic {
            length: item.length_item().item().clone(),
            flexible: item.flexible_item().item().clone(),
        }
    }
}
