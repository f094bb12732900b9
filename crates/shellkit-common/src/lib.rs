//! # ShellKit Common
//!
//! Shared pieces for the ShellKit offline worker crates.
//!
//! ## Features
//!
//! - Logging configuration and setup on top of `tracing-subscriber`
//! - Worker configuration: cache generation name, scope and bootstrap tiers

pub mod config;
pub mod logging;

pub use config::{BootstrapList, ConfigError, MatchScope, WorkerConfig};
pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
