//! Runtime configuration
//!
//! Both structs deserialize from any figment/serde source; missing fields
//! take their documented defaults.

use crate::error::{PlcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Identifier whose interval applies to every item without its own entry
pub const DEFAULT_IDENTIFIER: &str = "*";

/// Polling interval used when neither the item nor the default identifier
/// has an entry
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1000;

/// Configured intervals below this floor are raised to it
pub const MIN_POLLING_INTERVAL_MS: u64 = 50;

/// Delay between two reconnection attempts
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

fn default_name() -> String {
    "plc".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

// ============================================================================
// Engine
// ============================================================================

/// Connection engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Name used in logs and connection events
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl PlcConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PlcError::config("PLC name must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Polling intervals in milliseconds, keyed by item identifier
///
/// The entry [`DEFAULT_IDENTIFIER`] overrides the built-in default for all
/// items without an entry of their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub intervals: HashMap<String, u64>,
}

impl MonitorConfig {
    pub fn with_interval(mut self, identifier: impl Into<String>, interval_ms: u64) -> Self {
        self.intervals.insert(identifier.into(), interval_ms);
        self
    }

    pub fn with_default_interval(self, interval_ms: u64) -> Self {
        self.with_interval(DEFAULT_IDENTIFIER, interval_ms)
    }

    /// Resolve the polling interval of `identifier`
    ///
    /// Item entry, then the default identifier entry, then
    /// [`DEFAULT_POLLING_INTERVAL_MS`]; never below
    /// [`MIN_POLLING_INTERVAL_MS`].
    pub fn interval_for(&self, identifier: &str) -> Duration {
        let ms = self
            .intervals
            .get(identifier)
            .or_else(|| self.intervals.get(DEFAULT_IDENTIFIER))
            .copied()
            .unwrap_or(DEFAULT_POLLING_INTERVAL_MS);
        Duration::from_millis(ms.max(MIN_POLLING_INTERVAL_MS))
    }
}
