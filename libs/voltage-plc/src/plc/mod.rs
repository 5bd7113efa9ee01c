//! Connection and read/write engine
//!
//! `Plc` owns a backend, tracks the connection state and turns item requests
//! into backend calls. While the engine is not connected every request is
//! suspended until the link comes back, the caller cancels, or the engine is
//! disposed. Data-level failures are surfaced immediately and never retried.

mod reconnect;
mod state;

pub use reconnect::{ReconnectPolicy, ReconnectStats};
pub use state::{ConnectionEvent, ConnectionState};

use crate::backend::{Backend, BackendError};
use crate::config::PlcConfig;
use crate::error::{PlcError, Result, Usage};
use crate::item::{PlcItem, RequestItem, TypedItem};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Handle to a connection engine
///
/// Cloning is cheap; all clones drive the same connection.
#[derive(Clone)]
pub struct Plc {
    inner: Arc<PlcInner>,
}

struct PlcInner {
    name: String,
    backend: Box<dyn Backend>,
    policy: ReconnectPolicy,
    /// Serialises open/close and state transitions
    state_lock: tokio::sync::Mutex<()>,
    state: RwLock<ConnectionState>,
    /// Bumped on every successful open
    link: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
    suspended: Mutex<Vec<oneshot::Sender<()>>>,
    disposed: CancellationToken,
    reconnecting: AtomicBool,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<ReconnectStats>,
}

impl Drop for PlcInner {
    fn drop(&mut self) {
        self.disposed.cancel();
        if let Some(task) = self.reconnect_task.get_mut().take() {
            task.abort();
        }
    }
}

enum Resume {
    Retry,
    Cancelled,
    Disposed,
}

impl Plc {
    pub fn new<B>(backend: B, config: PlcConfig) -> Self
    where
        B: Backend + 'static,
    {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(PlcInner {
                name: config.name.clone(),
                backend: Box::new(backend),
                policy: ReconnectPolicy::from_config(&config),
                state_lock: tokio::sync::Mutex::new(()),
                state: RwLock::new(ConnectionState::Disconnected),
                link: AtomicU64::new(0),
                events,
                suspended: Mutex::new(Vec::new()),
                disposed: CancellationToken::new(),
                reconnecting: AtomicBool::new(false),
                reconnect_task: Mutex::new(None),
                stats: Mutex::new(ReconnectStats::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receive every connection state change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn reconnect_stats(&self) -> ReconnectStats {
        self.inner.stats.lock().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.is_cancelled()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Open the backend and release suspended requests
    ///
    /// A failed open closes the backend again (best effort) and leaves the
    /// state untouched, so an interrupted engine keeps reconnecting.
    pub async fn connect(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        let _guard = self.inner.state_lock.lock().await;
        if self.inner.backend.open().await {
            self.inner.link.fetch_add(1, Ordering::SeqCst);
            self.set_state(ConnectionState::Connected);
            self.release_suspended();
            true
        } else {
            warn!(plc = %self.inner.name, "Failed to open connection");
            let _ = self.inner.backend.close().await;
            false
        }
    }

    /// Close the backend
    ///
    /// Suspended requests stay suspended, and no reconnection is attempted
    /// until [`Plc::connect`] is called.
    pub async fn disconnect(&self) -> bool {
        let _guard = self.inner.state_lock.lock().await;
        if self.inner.backend.close().await {
            self.set_state(ConnectionState::Disconnected);
            true
        } else {
            warn!(plc = %self.inner.name, "Failed to close connection");
            false
        }
    }

    pub async fn reconnect(&self) -> bool {
        self.disconnect().await;
        self.connect().await
    }

    /// Stop the engine for good
    ///
    /// Pending requests fail with [`PlcError::Disposed`], the reconnection
    /// loop is awaited and the backend closed.
    pub async fn dispose(&self) {
        if self.inner.disposed.is_cancelled() {
            return;
        }
        info!(plc = %self.inner.name, "Disposing PLC");
        self.inner.disposed.cancel();

        let task = self.inner.reconnect_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let _guard = self.inner.state_lock.lock().await;
        let _ = self.inner.backend.close().await;
        self.set_state(ConnectionState::Disconnected);
        self.inner.suspended.lock().clear();
    }

    /// Must be called with the state lock held
    fn set_state(&self, new: ConnectionState) {
        let previous = std::mem::replace(&mut *self.inner.state.write(), new);
        if previous == new {
            return;
        }
        info!(plc = %self.inner.name, from = %previous, to = %new, "Connection state changed");
        let _ = self.inner.events.send(ConnectionEvent {
            plc: self.inner.name.clone(),
            previous,
            current: new,
        });
    }

    fn release_suspended(&self) {
        let waiting = std::mem::take(&mut *self.inner.suspended.lock());
        if !waiting.is_empty() {
            debug!(plc = %self.inner.name, count = waiting.len(), "Resuming suspended requests");
        }
        for tx in waiting {
            let _ = tx.send(());
        }
    }

    /// Link loss reported by a transfer that ran on link number `link`
    ///
    /// A report about a link that has since been reopened is stale and
    /// leaves the state alone.
    async fn interrupted(&self, link: u64) {
        {
            let _guard = self.inner.state_lock.lock().await;
            if self.state() == ConnectionState::Connected
                && self.inner.link.load(Ordering::SeqCst) == link
            {
                self.set_state(ConnectionState::Interrupted);
            }
        }
        if self.state() == ConnectionState::Interrupted {
            self.start_reconnect();
        }
    }

    /// Close the backend ahead of a reconnect attempt
    ///
    /// Returns `false` without closing if the engine is no longer
    /// interrupted, e.g. because `connect` won the race for the state lock.
    async fn close_interrupted(&self) -> bool {
        let _guard = self.inner.state_lock.lock().await;
        if self.state() != ConnectionState::Interrupted {
            return false;
        }
        let _ = self.inner.backend.close().await;
        true
    }

    fn start_reconnect(&self) {
        if self.is_disposed()
            || self
                .inner
                .reconnecting
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return;
        }
        let task = tokio::spawn(reconnect::run(Arc::downgrade(&self.inner)));
        *self.inner.reconnect_task.lock() = Some(task);
    }

    /// Wait until the engine is connected again
    async fn suspend(&self, cancel: &CancellationToken) -> Resume {
        let (tx, rx) = oneshot::channel();
        {
            let mut suspended = self.inner.suspended.lock();
            if self.state() == ConnectionState::Connected {
                return Resume::Retry;
            }
            suspended.push(tx);
        }
        debug!(plc = %self.inner.name, "Request suspended until reconnect");

        tokio::select! {
            biased;
            _ = self.inner.disposed.cancelled() => Resume::Disposed,
            _ = cancel.cancelled() => Resume::Cancelled,
            _ = rx => Resume::Retry,
        }
    }

    // ========================================================================
    // Read/write pipeline
    // ========================================================================

    /// Read every item, suspending while the engine is not connected
    ///
    /// Returns `Ok(false)` if `cancel` fired before completion.
    pub async fn read_items(&self, items: &[RequestItem], cancel: &CancellationToken) -> Result<bool> {
        self.execute(items, Usage::Read, cancel).await
    }

    /// Write every item, suspending while the engine is not connected
    pub async fn write_items(&self, items: &[RequestItem], cancel: &CancellationToken) -> Result<bool> {
        self.execute(items, Usage::Write, cancel).await
    }

    pub async fn read_item(
        &self,
        item: impl Into<RequestItem>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.read_items(&[item.into()], cancel).await
    }

    pub async fn write_item(
        &self,
        item: impl Into<RequestItem>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.write_items(&[item.into()], cancel).await
    }

    /// Read a typed item and return its fresh value, `None` if cancelled
    pub async fn read_value<T>(
        &self,
        item: &TypedItem<T>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.read_item(item, cancel).await? {
            Ok(Some(item.value()))
        } else {
            Ok(None)
        }
    }

    /// Set a typed item and write it
    pub async fn write_value<T>(
        &self,
        item: &TypedItem<T>,
        value: T,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        T: Clone + Send + Sync + 'static,
    {
        item.set_value(value)?;
        self.write_item(item, cancel).await
    }

    /// Split dynamic items into two phases
    ///
    /// Reads fetch lengths first so the flexible parts are resized before
    /// they are read; writes store the data first and the length last.
    async fn execute(
        &self,
        items: &[RequestItem],
        usage: Usage,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut first = Vec::with_capacity(items.len());
        let mut second = Vec::new();
        for item in items {
            match (item, usage) {
                (RequestItem::Plain(item), _) => first.push(item.clone()),
                (RequestItem::Dynamic { length, flexible }, Usage::Read) => {
                    first.push(length.clone());
                    second.push(flexible.clone());
                },
                (RequestItem::Dynamic { length, flexible }, Usage::Write) => {
                    first.push(flexible.clone());
                    second.push(length.clone());
                },
            }
        }

        if !self.perform(first, usage, cancel).await? {
            return Ok(false);
        }
        self.perform(second, usage, cancel).await
    }

    async fn perform(
        &self,
        items: Vec<Arc<PlcItem>>,
        usage: Usage,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let items: Vec<Arc<PlcItem>> = items
            .into_iter()
            .filter(|item| item.bit_length() > 0)
            .collect();
        if items.is_empty() {
            return Ok(true);
        }

        // Cancelled when the call returns, or by disposal.
        let operation = self.inner.disposed.child_token();
        let _operation_guard = operation.clone().drop_guard();

        loop {
            if self.is_disposed() {
                return Err(PlcError::disposed(usage, &items));
            }
            if cancel.is_cancelled() {
                return Ok(false);
            }

            if self.state() != ConnectionState::Connected {
                self.not_connected();
                match self.suspend(cancel).await {
                    Resume::Retry => continue,
                    Resume::Cancelled => return Ok(false),
                    Resume::Disposed => return Err(PlcError::disposed(usage, &items)),
                }
            }

            let link = self.inner.link.load(Ordering::SeqCst);
            let outcome = tokio::select! {
                biased;
                _ = self.inner.disposed.cancelled() => {
                    return Err(PlcError::disposed(usage, &items));
                }
                _ = cancel.cancelled() => return Ok(false),
                outcome = self.inner.backend.perform_read_write(&items, usage, &operation) => outcome,
            };

            match outcome {
                Ok(()) => return Ok(true),
                Err(BackendError::ReadWrite(e)) => {
                    warn!(plc = %self.inner.name, %usage, "Backend {}", e);
                    return Err(e.into());
                },
                Err(BackendError::ConnectionLost(reason)) => {
                    warn!(plc = %self.inner.name, %usage, "Link lost: {}", reason);
                    self.interrupted(link).await;
                },
            }
        }
    }

    /// Internal not-connected condition
    ///
    /// Only an interrupted engine reconnects on its own; one disconnected by
    /// request waits for an explicit `connect`.
    fn not_connected(&self) {
        if self.state() == ConnectionState::Interrupted {
            self.start_reconnect();
        }
    }
}

impl std::fmt::Debug for Plc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plc")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
