//! Backend contract
//!
//! A backend moves item data between the runtime and a controller. The
//! engine owns it and never calls it concurrently with `open`/`close`.

mod init;
mod memory;

pub use init::{BackendInitializer, InitState};
pub use memory::{MemoryBackend, MemoryStats};

use crate::error::{ReadWriteError, Usage};
use crate::item::PlcItem;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure of a backend transfer
///
/// Backends classify their failures explicitly: a lost link is retried by
/// the engine after reconnection, a data-level failure is surfaced as is.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error(transparent)]
    ReadWrite(#[from] ReadWriteError),
}

impl BackendError {
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        BackendError::ConnectionLost(msg.into())
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, BackendError::ConnectionLost(_))
    }
}

/// Vendor-specific access to a controller
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open the link, returning whether it is usable
    async fn open(&self) -> bool;

    /// Close the link, returning whether it was closed cleanly
    async fn close(&self) -> bool;

    /// Read into or write from `items`
    ///
    /// Reads transfer the fetched data into each item's bits. `cancel` fires
    /// when the caller gives up or the engine is disposed.
    async fn perform_read_write(
        &self,
        items: &[Arc<PlcItem>],
        usage: Usage,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    async fn open(&self) -> bool {
        (**self).open().await
    }

    async fn close(&self) -> bool {
        (**self).close().await
    }

    async fn perform_read_write(
        &self,
        items: &[Arc<PlcItem>],
        usage: Usage,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        (**self).perform_read_write(items, usage, cancel).await
    }
}
