//! Polling group: items sharing one address and one interval

use super::ItemReader;
use crate::bits::BitCollection;
use crate::item::{ItemKey, PlcItem};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct PollingGroup {
    key: ItemKey,
    interval: Duration,
    /// Private copy read on behalf of every member
    placeholder: Arc<PlcItem>,
    members: Mutex<Vec<Arc<PlcItem>>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PollingGroup {
    pub(crate) fn new(first: &Arc<PlcItem>, interval: Duration) -> Self {
        Self {
            key: first.key(),
            interval,
            placeholder: Arc::new(first.duplicate()),
            members: Mutex::new(vec![first.clone()]),
            task: Mutex::new(None),
        }
    }

    /// Add a member; the same instance is only added once
    pub(crate) fn add(&self, item: &Arc<PlcItem>) -> bool {
        let mut members = self.members.lock();
        if members.iter().any(|m| Arc::ptr_eq(m, item)) {
            return false;
        }
        members.push(item.clone());
        true
    }

    pub(crate) fn remove(&self, item: &Arc<PlcItem>) -> bool {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|m| !Arc::ptr_eq(m, item));
        members.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub(crate) fn start(self: &Arc<Self>, reader: Arc<dyn ItemReader>, token: CancellationToken) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }
        let group = self.clone();
        let handle = tokio::spawn(group.run(reader, token.clone()));
        *task = Some((token, handle));
    }

    pub(crate) async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some((token, handle)) = task {
            token.cancel();
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>, reader: Arc<dyn ItemReader>, token: CancellationToken) {
        debug!(group = %self.key, interval_ms = self.interval.as_millis() as u64, "Polling group started");
        let request = [self.placeholder.clone()];
        loop {
            match reader.read(&request, &token).await {
                Ok(true) => self.fan_out().await,
                Ok(false) => break,
                Err(e) if e.is_disposed() => break,
                Err(e) => warn!(group = %self.key, "Poll failed: {}", e),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!(group = %self.key, "Polling group stopped");
    }

    /// Copy the placeholder's content into every member concurrently
    async fn fan_out(&self) {
        let data = Arc::new(self.placeholder.bits().clone());
        let members = self.members.lock().clone();
        debug!(group = %self.key, members = members.len(), "Poll completed");
        let updates = members.into_iter().map(|member| {
            let data = data.clone();
            tokio::spawn(async move { transfer(&member, &data) })
        });
        for result in futures::future::join_all(updates).await {
            if let Ok(Err(e)) = result {
                warn!(group = %self.key, "Fan-out failed: {}", e);
            }
        }
    }
}

fn transfer(member: &PlcItem, data: &BitCollection) -> Result<(), crate::bits::BitError> {
    member.bits().transfer_from(data, 0)
}
