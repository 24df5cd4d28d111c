//! Domain-driven configuration management for gatehouse
//!
//! Configuration is split by functional domain (database, logging, rbac),
//! with validation, defaults, and environment variable support.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    database::DatabaseConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    rbac::{AuditConfig, AuditSinkKind, RbacConfig, SystemRoleConfig},
    GatehouseConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
