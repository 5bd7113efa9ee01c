//! In-memory backend
//!
//! Stores controller memory per region and data block at bit granularity.
//! Used for testing and simulation; the link can be taken offline, dropped
//! once, slowed down, and individual items can be made to fail.

use super::{Backend, BackendError, BackendInitializer};
use crate::error::{FailedItem, ReadWriteError, Usage};
use crate::item::{PlcItem, Region};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type BlockKey = (Region, u16);

/// In-memory backend implementation
pub struct MemoryBackend {
    blocks: DashMap<BlockKey, Vec<u8>>,
    init: BackendInitializer,
    online: AtomicBool,
    connected: AtomicBool,
    drop_next: AtomicBool,
    failures: DashMap<String, String>,
    latency: Mutex<Option<Duration>>,
    opens: AtomicU64,
    closes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    initializations: AtomicU64,
}

/// Call counters of a [`MemoryBackend`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub opens: u64,
    pub closes: u64,
    pub reads: u64,
    pub writes: u64,
    pub initializations: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            blocks: DashMap::new(),
            init: BackendInitializer::new("memory"),
            online: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            drop_next: AtomicBool::new(false),
            failures: DashMap::new(),
            latency: Mutex::new(None),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            initializations: AtomicU64::new(0),
        }
    }

    /// Whether `open` succeeds; going offline also drops an open link
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Lose the link on the next transfer, once
    pub fn drop_link(&self) {
        self.drop_next.store(true, Ordering::SeqCst);
    }

    /// Make every transfer of the item `identifier` fail with `message`
    pub fn fail_item(&self, identifier: impl Into<String>, message: impl Into<String>) {
        self.failures.insert(identifier.into(), message.into());
    }

    pub fn clear_failure(&self, identifier: &str) -> bool {
        self.failures.remove(identifier).is_some()
    }

    /// Delay every transfer by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Seed memory starting at byte `position`
    pub fn write_bytes(&self, region: Region, data_block: u16, position: u16, data: &[u8]) {
        let start = position as usize;
        let mut block = self.blocks.entry(block_key(region, data_block)).or_default();
        if block.len() < start + data.len() {
            block.resize(start + data.len(), 0);
        }
        block[start..start + data.len()].copy_from_slice(data);
    }

    /// Copy `len` bytes starting at byte `position`; unset memory reads as 0
    pub fn read_bytes(&self, region: Region, data_block: u16, position: u16, len: usize) -> Vec<u8> {
        let start = position as usize;
        let mut out = vec![0u8; len];
        if let Some(block) = self.blocks.get(&block_key(region, data_block)) {
            for (i, byte) in out.iter_mut().enumerate() {
                if let Some(value) = block.get(start + i) {
                    *byte = *value;
                }
            }
        }
        out
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            opens: self.opens.load(Ordering::SeqCst),
            closes: self.closes.load(Ordering::SeqCst),
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            initializations: self.initializations.load(Ordering::SeqCst),
        }
    }

    fn read_item(&self, item: &PlcItem) -> Vec<bool> {
        let address = item.address();
        let offset = address.bit_offset();
        let len = item.bit_length();
        let block = self.blocks.get(&block_key(address.region, address.data_block));
        (offset..offset + len)
            .map(|bit| {
                block
                    .as_ref()
                    .and_then(|data| data.get(bit / 8).copied())
                    .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
            })
            .collect()
    }

    fn write_item(&self, item: &PlcItem) {
        let address = item.address();
        let offset = address.bit_offset();
        let values = item.bits().to_bools();
        let mut block = self
            .blocks
            .entry(block_key(address.region, address.data_block))
            .or_default();
        let needed = (offset + values.len()).div_ceil(8);
        if block.len() < needed {
            block.resize(needed, 0);
        }
        for (i, value) in values.into_iter().enumerate() {
            let bit = offset + i;
            let mask = 1u8 << (bit % 8);
            if value {
                block[bit / 8] |= mask;
            } else {
                block[bit / 8] &= !mask;
            }
        }
    }

    fn transfer(&self, items: &[Arc<PlcItem>], usage: Usage) -> Result<(), BackendError> {
        let mut succeeded = Vec::with_capacity(items.len());
        let mut failed = Vec::new();

        for item in items {
            if let Some(message) = self.failures.get(item.identifier()) {
                failed.push(FailedItem {
                    item: item.clone(),
                    message: message.value().clone(),
                });
                continue;
            }
            match usage {
                Usage::Read => {
                    let values = self.read_item(item);
                    if let Err(e) = item.bits().transfer_from_bools(&values, 0) {
                        failed.push(FailedItem {
                            item: item.clone(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                },
                Usage::Write => self.write_item(item),
            }
            succeeded.push(item.clone());
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ReadWriteError::new(usage, succeeded, failed).into())
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn block_key(region: Region, data_block: u16) -> BlockKey {
    match region {
        Region::Data => (region, data_block),
        _ => (region, 0),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open(&self) -> bool {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let initialized = self
            .init
            .ensure_initialized(|| async {
                self.initializations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        if initialized.is_err() || !self.online.load(Ordering::SeqCst) {
            return false;
        }
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn close(&self) -> bool {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        true
    }

    async fn perform_read_write(
        &self,
        items: &[Arc<PlcItem>],
        usage: Usage,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BackendError::connection_lost("memory backend is not open"));
        }
        if self.drop_next.swap(false, Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            debug!("Memory backend dropped the link");
            return Err(BackendError::connection_lost("link dropped"));
        }

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ReadWriteError::all_failed(usage, items, "cancelled").into());
                }
                _ = tokio::time::sleep(latency) => {}
            }
        }

        match usage {
            Usage::Read => self.reads.fetch_add(1, Ordering::SeqCst),
            Usage::Write => self.writes.fetch_add(1, Ordering::SeqCst),
        };
        self.transfer(items, usage)
    }
}
