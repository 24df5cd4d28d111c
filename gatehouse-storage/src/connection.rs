use crate::config::DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection as SeaConnection, DbErr};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Database connection wrapper with configuration
#[derive(Clone)]
pub struct DatabaseConnection {
    connection: SeaConnection,
    config: DatabaseConfig,
}

/// Database-related errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    DbError(#[from] DbErr),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DatabaseConnection {
    /// Create a new database connection with configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        info!("Connecting to database: {}", config.url);

        Self::ensure_sqlite_file_exists(&config.url)?;

        let (min_connections, max_connections) = config.pool_sizes();

        let mut opts = ConnectOptions::new(Self::connect_url(&config.url));
        opts.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(config.connection_timeout)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(Duration::from_secs(300))
            .sqlx_logging(config.sql_logging)
            .sqlx_logging_level(log::LevelFilter::Debug);

        if !config.is_in_memory() {
            opts.max_lifetime(Duration::from_secs(3600));
        }

        let connection = Database::connect(opts).await?;

        debug!(
            "Database connection established with {} max connections",
            max_connections
        );

        Ok(Self { connection, config })
    }

    /// Wrap an already-open connection
    pub fn from_connection(connection: SeaConnection, config: DatabaseConfig) -> Self {
        Self { connection, config }
    }

    /// File-backed SQLite URLs get `mode=rwc` so the file is created on first use
    fn connect_url(database_url: &str) -> String {
        if database_url.starts_with("sqlite:")
            && !database_url.contains(":memory:")
            && !database_url.contains('?')
        {
            format!("{}?mode=rwc", database_url)
        } else {
            database_url.to_string()
        }
    }

    /// Ensure the parent directory of a file-based SQLite database exists
    pub(crate) fn ensure_sqlite_file_exists(database_url: &str) -> Result<(), DatabaseError> {
        if !database_url.starts_with("sqlite:") {
            debug!("Non-SQLite database detected, skipping file creation logic");
            return Ok(());
        }

        if database_url.contains(":memory:") {
            debug!("Using in-memory SQLite database");
            return Ok(());
        }

        let without_scheme = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .ok_or_else(|| {
                DatabaseError::ConfigError(format!("Invalid SQLite URL format: {}", database_url))
            })?;

        let file_path = without_scheme.split('?').next().unwrap_or(without_scheme);
        if file_path.is_empty() {
            return Err(DatabaseError::ConfigError(format!(
                "SQLite URL has no file path: {}",
                database_url
            )));
        }

        let path = std::path::Path::new(file_path);

        if let Some(parent_dir) = path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                info!("Creating database directory: {:?}", parent_dir);
                std::fs::create_dir_all(parent_dir).map_err(|e| {
                    DatabaseError::ConfigError(format!(
                        "Failed to create database directory {:?}: {}",
                        parent_dir, e
                    ))
                })?;
            }
        }

        if path.exists() {
            debug!("Using existing database file: {:?}", path);
        } else {
            info!("Database file will be created by SQLite: {:?}", path);
        }

        Ok(())
    }

    /// Get the underlying Sea-ORM connection
    pub fn get_connection(&self) -> &SeaConnection {
        &self.connection
    }

    /// Get database configuration
    pub fn get_config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        use sea_orm_migration::MigratorTrait;

        info!("Running database migrations");

        crate::migrations::Migrator::up(&self.connection, None)
            .await
            .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Check database connectivity
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        debug!("Pinging database");

        match self.connection.ping().await {
            Ok(_) => {
                debug!("Database ping successful");
                Ok(())
            }
            Err(e) => {
                debug!("Database ping failed: {}", e);
                Err(DatabaseError::DbError(e))
            }
        }
    }

    /// Close the database connection
    pub async fn close(self) -> Result<(), DatabaseError> {
        info!("Closing database connection");
        self.connection.close().await?;
        debug!("Database connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
            min_connections: 1,
            connection_timeout: Duration::from_secs(10),
            sql_logging: false,
        }
    }

    #[tokio::test]
    async fn test_database_connection() {
        let db = DatabaseConnection::new(create_test_config()).await;
        assert!(db.is_ok());

        let db = db.unwrap();
        assert!(db.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_database_migration_is_repeatable() {
        let db = DatabaseConnection::new(create_test_config()).await.unwrap();

        assert!(db.migrate().await.is_ok());
        assert!(db.migrate().await.is_ok());
    }

    #[tokio::test]
    async fn test_file_database_created_in_new_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("data").join("gatehouse.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            ..create_test_config()
        };

        let db = DatabaseConnection::new(config).await.unwrap();
        db.migrate().await.unwrap();
        db.close().await.unwrap();

        assert!(db_path.exists());
    }

    #[test]
    fn test_ensure_sqlite_file_exists_in_memory() {
        assert!(DatabaseConnection::ensure_sqlite_file_exists("sqlite::memory:").is_ok());
    }

    #[test]
    fn test_ensure_sqlite_file_exists_creates_parent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

        assert!(!db_path.parent().unwrap().exists());
        assert!(DatabaseConnection::ensure_sqlite_file_exists(&db_url).is_ok());
        assert!(db_path.parent().unwrap().exists());
    }

    #[test]
    fn test_ensure_sqlite_file_exists_non_sqlite() {
        assert!(
            DatabaseConnection::ensure_sqlite_file_exists("postgresql://localhost/test").is_ok()
        );
    }

    #[test]
    fn test_connect_url_adds_create_mode() {
        assert_eq!(
            DatabaseConnection::connect_url("sqlite://gatehouse.db"),
            "sqlite://gatehouse.db?mode=rwc"
        );
        assert_eq!(
            DatabaseConnection::connect_url("sqlite::memory:"),
            "sqlite::memory:"
        );
        assert_eq!(
            DatabaseConnection::connect_url("sqlite://a.db?mode=ro"),
            "sqlite://a.db?mode=ro"
        );
    }
}
