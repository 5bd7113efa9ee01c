//! Reconnection loop
//!
//! At most one loop runs per engine. It keeps closing, waiting and
//! reconnecting for as long as the engine stays interrupted, and exits as
//! soon as the state changes (connected, disconnected by request) or the
//! engine is disposed.

use super::{ConnectionState, Plc, PlcInner};
use crate::config::PlcConfig;
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Reconnection timing
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Wait between closing the broken link and the next connect attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(crate::config::DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &PlcConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
        }
    }
}

/// Reconnection statistics
#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    /// Connect attempts made by the loop
    pub attempts: u64,
    /// Attempts that brought the link back
    pub successes: u64,
    /// Last time the loop reconnected
    pub last_reconnected: Option<Instant>,
}

fn upgrade(inner: &Weak<PlcInner>) -> Option<Plc> {
    inner.upgrade().map(|inner| Plc { inner })
}

pub(super) async fn run(inner: Weak<PlcInner>) {
    let Some(plc) = upgrade(&inner) else {
        return;
    };
    let name = plc.name().to_string();
    let disposed = plc.inner.disposed.clone();
    let delay = plc.inner.policy.delay;
    drop(plc);

    info!(plc = %name, "Reconnection loop started");
    loop {
        while let Some(plc) = upgrade(&inner) {
            if disposed.is_cancelled() || !plc.close_interrupted().await {
                break;
            }
            drop(plc);

            tokio::select! {
                _ = disposed.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(plc) = upgrade(&inner) else {
                break;
            };
            if plc.state() != ConnectionState::Interrupted {
                break;
            }
            plc.inner.stats.lock().attempts += 1;
            if plc.connect().await {
                let mut stats = plc.inner.stats.lock();
                stats.successes += 1;
                stats.last_reconnected = Some(Instant::now());
            } else {
                debug!(plc = %name, "Reconnect attempt failed");
            }
        }

        let Some(plc) = upgrade(&inner) else {
            break;
        };
        plc.inner.reconnecting.store(false, Ordering::SeqCst);
        // An interruption raised between the last check and the flag reset
        // could not start its own loop, so take over here.
        if plc.state() == ConnectionState::Interrupted
            && !disposed.is_cancelled()
            && plc
                .inner
                .reconnecting
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            continue;
        }
        break;
    }
    info!(plc = %name, "Reconnection loop stopped");
}
