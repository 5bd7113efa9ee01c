//! Error types for voltage-plc

use crate::bits::BitError;
use crate::item::PlcItem;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Direction of a read/write request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Usage {
    Read,
    Write,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Usage::Read => f.write_str("read"),
            Usage::Write => f.write_str("write"),
        }
    }
}

/// An item that could not be transferred, with the backend's reason
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub item: Arc<PlcItem>,
    pub message: String,
}

/// Data-level failure of a read or write
///
/// Carries the items that were transferred and those that were not. These
/// failures are surfaced to the caller immediately and never retried.
#[derive(Debug, Clone)]
pub struct ReadWriteError {
    pub usage: Usage,
    pub succeeded: Vec<Arc<PlcItem>>,
    pub failed: Vec<FailedItem>,
}

impl ReadWriteError {
    pub fn new(usage: Usage, succeeded: Vec<Arc<PlcItem>>, failed: Vec<FailedItem>) -> Self {
        Self {
            usage,
            succeeded,
            failed,
        }
    }

    /// Every item failed with the same message
    pub fn all_failed(usage: Usage, items: &[Arc<PlcItem>], message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            usage,
            succeeded: Vec::new(),
            failed: items
                .iter()
                .map(|item| FailedItem {
                    item: item.clone(),
                    message: message.clone(),
                })
                .collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    fn summary(&self) -> String {
        self.failed
            .iter()
            .map(|f| format!("{} ({})", f.item.identifier(), f.message))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ReadWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {}/{} item(s): {}",
            self.usage,
            self.failed.len(),
            self.total(),
            self.summary()
        )
    }
}

impl std::error::Error for ReadWriteError {}

/// Main error type of the PLC runtime
#[derive(Error, Debug)]
pub enum PlcError {
    /// Data-level failure reported by the backend
    #[error(transparent)]
    ReadWrite(#[from] ReadWriteError),

    /// The engine was disposed while the operation was pending
    ///
    /// The succeeded subset is always empty.
    #[error("PLC disposed: {0}")]
    Disposed(ReadWriteError),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Unsupported numeric width: {width} bytes (supported: 1, 2, 4, 8)")]
    UnsupportedWidth { width: usize },

    #[error("Bit access error: {0}")]
    Bits(#[from] BitError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for the PLC runtime
pub type Result<T> = std::result::Result<T, PlcError>;

impl PlcError {
    pub fn invalid_item(msg: impl Into<String>) -> Self {
        PlcError::InvalidItem(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PlcError::Config(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        PlcError::Backend(msg.into())
    }

    pub(crate) fn disposed(usage: Usage, items: &[Arc<PlcItem>]) -> Self {
        PlcError::Disposed(ReadWriteError::all_failed(usage, items, "PLC disposed"))
    }

    /// Whether the failure is final because the engine is gone
    pub fn is_disposed(&self) -> bool {
        matches!(self, PlcError::Disposed(_))
    }
}
