//! Database testing utilities
//!
//! Isolated, migrated databases for unit and integration tests.

use tempfile::TempDir;
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::connection::DatabaseConnection;
use crate::store::EntityStore;

/// Test database errors
#[derive(Debug, Error)]
pub enum TestDatabaseError {
    #[error("Failed to create temporary directory: {0}")]
    TempDirCreation(String),

    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Migrated database for isolated testing
pub struct TestDatabase {
    _temp_dir: Option<TempDir>,
    pub store: EntityStore,
}

impl TestDatabase {
    /// Create an in-memory SQLite database (faster for tests)
    pub async fn new_in_memory() -> Result<Self, TestDatabaseError> {
        Self::open(DatabaseConfig::in_memory(), None).await
    }

    /// Create a file-backed SQLite database inside a temporary directory
    pub async fn new_sqlite() -> Result<Self, TestDatabaseError> {
        let temp_dir =
            TempDir::new().map_err(|e| TestDatabaseError::TempDirCreation(e.to_string()))?;
        let db_path = temp_dir.path().join("test.db");

        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", db_path.display()),
            max_connections: 1,
            min_connections: 1,
            connection_timeout: std::time::Duration::from_secs(5),
            sql_logging: false,
        };

        Self::open(config, Some(temp_dir)).await
    }

    async fn open(
        config: DatabaseConfig,
        temp_dir: Option<TempDir>,
    ) -> Result<Self, TestDatabaseError> {
        let database = DatabaseConnection::new(config)
            .await
            .map_err(|e| TestDatabaseError::Connection(e.to_string()))?;

        database
            .migrate()
            .await
            .map_err(|e| TestDatabaseError::Migration(e.to_string()))?;

        Ok(Self {
            _temp_dir: temp_dir,
            store: EntityStore::new(database),
        })
    }

    pub fn store(&self) -> EntityStore {
        self.store.clone()
    }
}
