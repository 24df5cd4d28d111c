//! Configuration loading and environment variable handling

use crate::domains::GatehouseConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "GATEHOUSE".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<GatehouseConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: GatehouseConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<GatehouseConfig> {
        let mut config = GatehouseConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<GatehouseConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut GatehouseConfig) -> ConfigResult<()> {
        self.apply_database_overrides(&mut config.database)?;
        self.apply_logging_overrides(&mut config.logging)?;
        self.apply_rbac_overrides(&mut config.rbac)?;
        Ok(())
    }

    fn apply_database_overrides(
        &self,
        config: &mut crate::domains::database::DatabaseConfig,
    ) -> ConfigResult<()> {
        if let Ok(url) = self.get_env_var("DATABASE_URL") {
            config.url = url;
        }

        if let Ok(max) = self.get_env_var("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = max.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid DATABASE_MAX_CONNECTIONS: {}", e))
            })?;
        }

        if let Ok(timeout) = self.get_env_var("DATABASE_CONNECTION_TIMEOUT") {
            let seconds: u64 = timeout.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid DATABASE_CONNECTION_TIMEOUT: {}", e))
            })?;
            config.connection_timeout = Duration::from_secs(seconds);
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(log_format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&log_format).map_err(
                |_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", log_format)),
            )?;
        }

        Ok(())
    }

    fn apply_rbac_overrides(
        &self,
        config: &mut crate::domains::rbac::RbacConfig,
    ) -> ConfigResult<()> {
        if let Ok(enabled) = self.get_env_var("AUDIT_ENABLED") {
            config.audit.enabled = enabled
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid AUDIT_ENABLED: {}", e)))?;
        }

        if let Ok(sink) = self.get_env_var("AUDIT_SINK") {
            config.audit.sink = crate::domains::rbac::AuditSinkKind::from_str(&sink)
                .map_err(|_| ConfigError::EnvError(format!("Invalid AUDIT_SINK: {}", sink)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}
