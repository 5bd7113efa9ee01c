//! Connection state and events

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of an engine
///
/// Only engine methods move between states; a backend can only cause
/// `Interrupted` by reporting a lost link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Interrupted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Raised on every actual state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub plc: String,
    pub previous: ConnectionState,
    pub current: ConnectionState,
}
