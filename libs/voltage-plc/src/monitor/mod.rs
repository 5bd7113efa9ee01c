//! Background polling of items
//!
//! Items with the same identity and the same resolved interval share one
//! polling group, which reads a private placeholder once per interval and
//! copies the result into every member. Only the public item-read contract
//! of the engine is used, through [`ItemReader`].

mod group;

use crate::config::MonitorConfig;
use crate::error::{PlcError, Result};
use crate::item::{ItemKey, PlcItem, RequestItem, TypedItem};
use crate::plc::Plc;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use group::PollingGroup;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Read seam used by the monitor
#[async_trait]
pub trait ItemReader: Send + Sync {
    /// Read `items`; `Ok(false)` when `cancel` fired first
    async fn read(&self, items: &[Arc<PlcItem>], cancel: &CancellationToken) -> Result<bool>;
}

#[async_trait]
impl ItemReader for Plc {
    async fn read(&self, items: &[Arc<PlcItem>], cancel: &CancellationToken) -> Result<bool> {
        let request: Vec<RequestItem> = items.iter().map(RequestItem::from).collect();
        self.read_items(&request, cancel).await
    }
}

type GroupKey = (ItemKey, Duration);

/// Polling monitor
pub struct PlcMonitor {
    reader: Arc<dyn ItemReader>,
    config: MonitorConfig,
    groups: DashMap<GroupKey, Arc<PollingGroup>>,
    running: Mutex<Option<CancellationToken>>,
}

impl PlcMonitor {
    pub fn new(reader: Arc<dyn ItemReader>, config: MonitorConfig) -> Self {
        Self {
            reader,
            config,
            groups: DashMap::new(),
            running: Mutex::new(None),
        }
    }

    /// Monitor items through a connection engine
    pub fn for_plc(plc: &Plc, config: MonitorConfig) -> Self {
        Self::new(Arc::new(plc.clone()), config)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start polling `item`
    ///
    /// Returns `false` when this very instance is already monitored.
    /// Auto-adapt and empty items cannot be monitored: their length is not
    /// part of their identity.
    pub fn monitor_item(&self, item: &Arc<PlcItem>) -> Result<bool> {
        if item.bits().is_auto_adapt() {
            return Err(PlcError::invalid_item(format!(
                "{} has a flexible length and cannot be monitored",
                item.identifier()
            )));
        }
        if item.bit_length() == 0 {
            return Err(PlcError::invalid_item(format!(
                "{} is empty and cannot be monitored",
                item.identifier()
            )));
        }

        let interval = self.config.interval_for(item.identifier());
        // Lock order: running flag, then group map.
        let running = self.running.lock();
        match self.groups.entry((item.key(), interval)) {
            Entry::Occupied(entry) => Ok(entry.get().add(item)),
            Entry::Vacant(entry) => {
                let group = Arc::new(PollingGroup::new(item, interval));
                debug!(
                    item = %item.identifier(),
                    interval_ms = interval.as_millis() as u64,
                    "Polling group created"
                );
                if let Some(token) = running.as_ref() {
                    group.start(self.reader.clone(), token.child_token());
                }
                entry.insert(group);
                Ok(true)
            },
        }
    }

    pub fn monitor_typed<T>(&self, item: &TypedItem<T>) -> Result<bool> {
        self.monitor_item(item.item())
    }

    /// Stop polling `item`; its group keeps running
    pub fn unmonitor_item(&self, item: &Arc<PlcItem>) -> bool {
        let interval = self.config.interval_for(item.identifier());
        self.groups
            .get(&(item.key(), interval))
            .is_some_and(|group| group.remove(item))
    }

    pub fn unmonitor_typed<T>(&self, item: &TypedItem<T>) -> bool {
        self.unmonitor_item(item.item())
    }

    /// Start every group; groups created later start immediately
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        for group in self.groups.iter() {
            group.start(self.reader.clone(), token.child_token());
        }
        info!(groups = self.groups.len(), "Monitor started");
        *running = Some(token);
    }

    /// Stop every group and wait for their loops to end
    pub async fn stop(&self) {
        let token = self.running.lock().take();
        let Some(token) = token else {
            return;
        };
        token.cancel();
        let groups: Vec<Arc<PollingGroup>> = self.groups.iter().map(|g| g.value().clone()).collect();
        for group in &groups {
            group.stop().await;
        }
        info!(groups = groups.len(), "Monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of monitored item instances over all groups
    pub fn monitored_count(&self) -> usize {
        self.groups.iter().map(|g| g.len()).sum()
    }
}

impl Drop for PlcMonitor {
    fn drop(&mut self) {
        if let Some(token) = self.running.get_mut().take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for PlcMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcMonitor")
            .field("groups", &self.group_count())
            .field("monitored", &self.monitored_count())
            .field("running", &self.is_running())
            .finish()
    }
}
