use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Database configuration for the entity store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Idle connections kept open in the pool
    pub min_connections: u32,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Emit every SQL statement at debug level
    pub sql_logging: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connection_timeout: Duration::from_secs(30),
            sql_logging: false,
        }
    }
}

impl DatabaseConfig {
    /// In-memory configuration; a single pooled connection keeps one database alive
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }

    /// Effective `(min, max)` pool sizes. In-memory databases are pinned to a
    /// single connection since every connection would open its own database.
    pub fn pool_sizes(&self) -> (u32, u32) {
        if self.is_in_memory() {
            return (1, 1);
        }
        let max = self.max_connections.max(1);
        (self.min_connections.min(max), max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_pin_in_memory() {
        let config = DatabaseConfig {
            max_connections: 10,
            min_connections: 4,
            ..DatabaseConfig::in_memory()
        };
        assert_eq!(config.pool_sizes(), (1, 1));
    }

    #[test]
    fn test_pool_sizes_use_configured_minimum() {
        let config = DatabaseConfig {
            url: "sqlite://gatehouse.db".to_string(),
            max_connections: 8,
            min_connections: 3,
            ..Default::default()
        };
        assert_eq!(config.pool_sizes(), (3, 8));

        let inverted = DatabaseConfig {
            min_connections: 20,
            ..config
        };
        assert_eq!(inverted.pool_sizes(), (8, 8));
    }
}
