//! VoltageEMS Common Library
//!
//! Ambient pieces shared by the VoltageEMS tools: logging setup, layered
//! configuration loading, a common error type and graceful shutdown.

pub mod config;
pub mod error;
pub mod logging;
pub mod shutdown;

// Re-exports for convenience
pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Common prelude for VoltageEMS tools
pub mod prelude {
    pub use crate::config::{load_config, load_config_from_file};
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use crate::shutdown::wait_for_shutdown;
    pub use tracing::{debug, error, info, trace, warn};
}
