//! Logging utilities.
//!
//! This module centralizes logger initialization. The engine itself only logs
//! through the `log` facade; `env_logger` is the backend installed here.

mod init;

pub use init::{init_logging, LoggingConfig};
