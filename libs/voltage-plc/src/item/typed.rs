//! Typed view over a PLC item
//!
//! A `TypedItem<T>` pairs a [`PlcItem`] with an [`ItemCodec`]: a decoder
//! (`bits -> T`), an encoder (`T -> bits`) and an optional validator. The
//! decoded value is cached and refreshed on every change of the underlying
//! bits, whoever caused it (a backend read, a monitor fan-out, a local write).

use super::address::{Address, ItemKey};
use super::raw::PlcItem;
use crate::bits::BitCollection;
use crate::error::Result;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Decoder<T> = Arc<dyn Fn(&BitCollection) -> T + Send + Sync>;
type Encoder<T> = Arc<dyn Fn(&T) -> BitCollection + Send + Sync>;
type Validator<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Conversion functions between raw bits and `T`
pub struct ItemCodec<T> {
    decode: Decoder<T>,
    encode: Encoder<T>,
    validate: Option<Validator<T>>,
}

impl<T> ItemCodec<T> {
    pub fn new<D, E>(decode: D, encode: E) -> Self
    where
        D: Fn(&BitCollection) -> T + Send + Sync + 'static,
        E: Fn(&T) -> BitCollection + Send + Sync + 'static,
    {
        Self {
            decode: Arc::new(decode),
            encode: Arc::new(encode),
            validate: None,
        }
    }

    /// Normalise values before they are encoded
    pub fn with_validator<V>(mut self, validate: V) -> Self
    where
        V: Fn(T) -> T + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    pub fn decode(&self, bits: &BitCollection) -> T {
        (self.decode)(bits)
    }

    pub fn encode(&self, value: &T) -> BitCollection {
        (self.encode)(value)
    }

    pub fn validate(&self, value: T) -> T {
        match &self.validate {
            Some(validate) => validate(value),
            None => value,
        }
    }
}

impl<T> Clone for ItemCodec<T> {
    fn clone(&self) -> Self {
        Self {
            decode: self.decode.clone(),
            encode: self.encode.clone(),
            validate: self.validate.clone(),
        }
    }
}

/// Typed change event
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange<T> {
    pub old: T,
    pub new: T,
}

/// Handle returned by [`TypedItem::on_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueSubscription(u64);

type ValueHandler<T> = Arc<dyn Fn(&ValueChange<T>) + Send + Sync>;

struct TypedState<T> {
    codec: ItemCodec<T>,
    value: RwLock<T>,
    handlers: Mutex<Vec<(ValueSubscription, ValueHandler<T>)>>,
    next_id: AtomicU64,
}

impl<T: Clone> TypedState<T> {
    fn refresh(&self, bits: &BitCollection) {
        let new = self.codec.decode(bits);
        let old = std::mem::replace(&mut *self.value.write(), new.clone());

        let handlers: Vec<ValueHandler<T>> =
            self.handlers.lock().iter().map(|(_, h)| h.clone()).collect();
        if handlers.is_empty() {
            return;
        }
        let change = ValueChange { old, new };
        for handler in handlers {
            handler(&change);
        }
    }
}

/// A PLC item with a typed, cached value
///
/// Cloning is cheap and yields another handle to the same item.
pub struct TypedItem<T> {
    item: Arc<PlcItem>,
    state: Arc<TypedState<T>>,
}

impl<T> TypedItem<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an item of `bit_length` bits decoded through `codec`
    pub fn new(
        identifier: Option<&str>,
        address: Address,
        bit_length: usize,
        auto_adapt: bool,
        codec: ItemCodec<T>,
    ) -> Result<Self> {
        let item = Arc::new(PlcItem::with_length(
            identifier, address, bit_length, auto_adapt,
        )?);
        let value = codec.decode(item.bits());
        let state = Arc::new(TypedState {
            codec,
            value: RwLock::new(value),
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&state);
        item.bits().subscribe(move |bits, _| {
            if let Some(state) = weak.upgrade() {
                state.refresh(bits);
            }
        });

        Ok(Self { item, state })
    }

    /// Same as [`TypedItem::new`] followed by [`TypedItem::set_value`]
    pub fn with_value(
        identifier: Option<&str>,
        address: Address,
        bit_length: usize,
        auto_adapt: bool,
        codec: ItemCodec<T>,
        value: T,
    ) -> Result<Self> {
        let item = Self::new(identifier, address, bit_length, auto_adapt, codec)?;
        item.set_value(value)?;
        Ok(item)
    }

    /// Cached value, refreshed on every change of the underlying bits
    pub fn value(&self) -> T {
        self.state.value.read().clone()
    }

    /// Validate, encode and transfer `value` into the underlying bits
    pub fn set_value(&self, value: T) -> Result<()> {
        let value = self.state.codec.validate(value);
        let data = self.state.codec.encode(&value);
        self.item.bits().transfer_from(&data, 0)?;
        Ok(())
    }

    /// Register a handler for typed value changes
    pub fn on_change<F>(&self, handler: F) -> ValueSubscription
    where
        F: Fn(&ValueChange<T>) + Send + Sync + 'static,
    {
        let id = ValueSubscription(self.state.next_id.fetch_add(1, Ordering::Relaxed));
        self.state.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    pub fn remove_handler(&self, id: ValueSubscription) -> bool {
        let mut handlers = self.state.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }
}

impl<T> TypedItem<T> {
    /// The untyped item, as passed to engines and monitors
    pub fn item(&self) -> &Arc<PlcItem> {
        &self.item
    }

    pub fn identifier(&self) -> &str {
        self.item.identifier()
    }

    pub fn key(&self) -> ItemKey {
        self.item.key()
    }

    pub fn bits(&self) -> &BitCollection {
        self.item.bits()
    }
}

impl<T> Clone for TypedItem<T> {
    fn clone(&self) -> Self {
        Self {
            item: self.item.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T> PartialEq for TypedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.item == other.item
    }
}

impl<T> Eq for TypedItem<T> {}

impl<T> Hash for TypedItem<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.item.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for TypedItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedItem")
            .field("identifier", &self.item.identifier())
            .field("address", &self.item.plc_string())
            .field("value", &*self.state.value.read())
            .finish()
    }
}
