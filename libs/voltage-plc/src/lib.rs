//! VoltageEMS PLC Runtime
//!
//! Vendor-agnostic runtime for talking to industrial controllers. Concrete
//! wire protocols plug in through the [`Backend`] trait.
//!
//! # Key Components
//!
//! - **BitCollection**: thread-safe bit buffer with change notification
//! - **Items**: address-mapped raw, typed and length-prefixed items
//! - **Plc**: connection state machine and suspend/retry read-write pipeline
//! - **PlcMonitor**: background polling grouped by address and interval

pub mod bits;

pub mod item;

pub mod error;

pub mod config;

pub mod backend;

pub mod plc;

pub mod monitor;

// Re-exports
pub use bits::{BitChange, BitChanges, BitCollection, BitError, SubscriptionId};

pub use item::{
    kinds, Address, ByteOrder, DynamicItem, ItemCodec, ItemKey, NumericWidth, PlcItem, Region,
    RequestItem, TypedItem, ValueChange, ValueSubscription,
};

pub use error::{FailedItem, PlcError, ReadWriteError, Result, Usage};

pub use config::{
    MonitorConfig, PlcConfig, DEFAULT_IDENTIFIER, DEFAULT_POLLING_INTERVAL_MS,
    DEFAULT_RECONNECT_DELAY_MS, MIN_POLLING_INTERVAL_MS,
};

pub use backend::{
    Backend, BackendError, BackendInitializer, InitState, MemoryBackend, MemoryStats,
};

pub use plc::{ConnectionEvent, ConnectionState, Plc, ReconnectPolicy, ReconnectStats};

pub use monitor::{ItemReader, PlcMonitor};
