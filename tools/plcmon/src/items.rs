//! Builds runtime items from their configured kind

use crate::config::{ItemKind, ItemSpec};
use anyhow::{anyhow, Context};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use voltage_plc::{kinds, Address, DynamicItem, PlcItem, RequestItem, TypedItem};

/// A rendered value change
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub value: String,
}

/// Item watched by plcmon, independent of its value type
pub trait Watch: Send + Sync {
    fn name(&self) -> &str;

    fn request(&self) -> RequestItem;

    /// Item handed to the polling monitor; `None` for length-prefixed kinds
    fn monitored(&self) -> Option<Arc<PlcItem>>;

    fn render(&self) -> String;

    /// Forward every value change to `sink`
    fn forward_changes(&self, sink: UnboundedSender<Reading>);
}

struct Typed<T> {
    name: String,
    item: TypedItem<T>,
}

impl<T> Watch for Typed<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn request(&self) -> RequestItem {
        RequestItem::from(&self.item)
    }

    fn monitored(&self) -> Option<Arc<PlcItem>> {
        Some(self.item.item().clone())
    }

    fn render(&self) -> String {
        format!("{:?}", self.item.value())
    }

    fn forward_changes(&self, sink: UnboundedSender<Reading>) {
        forward(&self.item, self.name.clone(), sink);
    }
}

struct Dynamic<T> {
    name: String,
    item: DynamicItem<T>,
}

impl<T> Watch for Dynamic<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn request(&self) -> RequestItem {
        RequestItem::from(&self.item)
    }

    fn monitored(&self) -> Option<Arc<PlcItem>> {
        None
    }

    fn render(&self) -> String {
        format!("{:?}", self.item.value())
    }

    fn forward_changes(&self, sink: UnboundedSender<Reading>) {
        forward(self.item.flexible_item(), self.name.clone(), sink);
    }
}

fn forward<T>(item: &TypedItem<T>, name: String, sink: UnboundedSender<Reading>)
where
    T: Clone + Debug + Send + Sync + 'static,
{
    item.on_change(move |change| {
        let _ = sink.send(Reading {
            name: name.clone(),
            value: format!("{:?}", change.new),
        });
    });
}

fn typed<T>(name: &str, item: voltage_plc::Result<TypedItem<T>>) -> anyhow::Result<Box<dyn Watch>>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    Ok(Box::new(Typed {
        name: name.to_string(),
        item: item?,
    }))
}

fn dynamic<T>(name: &str, item: voltage_plc::Result<DynamicItem<T>>) -> anyhow::Result<Box<dyn Watch>>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    Ok(Box::new(Dynamic {
        name: name.to_string(),
        item: item?,
    }))
}

/// Build the runtime item described by `spec`
pub fn build(spec: &ItemSpec) -> anyhow::Result<Box<dyn Watch>> {
    let id = Some(spec.name.as_str());
    let address = Address::from(spec.address);
    let order = spec.byte_order;
    let length = || {
        spec.length
            .ok_or_else(|| anyhow!("item '{}' of kind {:?} needs a length", spec.name, spec.kind))
    };

    let watch = match spec.kind {
        ItemKind::Bit => typed(&spec.name, kinds::bit(id, address)),
        ItemKind::Byte => typed(&spec.name, kinds::byte(id, address)),
        ItemKind::Bytes => typed(&spec.name, kinds::bytes(id, address, length()?)),
        ItemKind::Int16 => typed(&spec.name, kinds::int16(id, address, order)),
        ItemKind::Uint16 => typed(&spec.name, kinds::uint16(id, address, order)),
        ItemKind::Int32 => typed(&spec.name, kinds::int32(id, address, order)),
        ItemKind::Uint32 => typed(&spec.name, kinds::uint32(id, address, order)),
        ItemKind::Int64 => typed(&spec.name, kinds::int64(id, address, order)),
        ItemKind::Uint64 => typed(&spec.name, kinds::uint64(id, address, order)),
        ItemKind::Float32 => typed(&spec.name, kinds::float32(id, address, order)),
        ItemKind::Float64 => typed(&spec.name, kinds::float64(id, address, order)),
        ItemKind::Text => typed(&spec.name, kinds::text(id, address, length()?)),
        ItemKind::DynamicBytes => {
            dynamic(&spec.name, DynamicItem::bytes(id, address, spec.length_width))
        },
        ItemKind::DynamicText => {
            dynamic(&spec.name, DynamicItem::text(id, address, spec.length_width))
        },
    };
    watch.with_context(|| format!("invalid item '{}'", spec.name))
}
