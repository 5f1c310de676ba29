//! Shared utilities for stock-sentinel
//!
//! Logging setup and application-level configuration used by the binaries in
//! the workspace.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
