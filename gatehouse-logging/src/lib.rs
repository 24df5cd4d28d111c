//! Structured logging initialisation for gatehouse
//!
//! All crates log through `tracing`; this crate installs the global
//! subscriber from a [`LoggingConfig`].

pub mod init;

pub use gatehouse_config::{LogFormat, LogLevel, LoggingConfig};
pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
