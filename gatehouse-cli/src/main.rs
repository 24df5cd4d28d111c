use anyhow::{Context, Result};
use clap::Parser;
use gatehouse_config::{ConfigLoader, GatehouseConfig, LogLevel};
use gatehouse_rbac::{Capability, MenuFilter, RbacServices};
use gatehouse_storage::{DatabaseConnection, EntityStore};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

mod cli;
use cli::{Cli, Commands, ConfigCommands, MenuTreeArgs};

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<GatehouseConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                loader
                    .from_file(path)
                    .context(format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

/// Initialize logging from configuration, with the CLI level taking precedence
fn init_logging(config: &GatehouseConfig, log_level: Option<&String>) -> Result<()> {
    let mut logging_config = config.logging.clone();
    if let Some(level_str) = log_level {
        match level_str.parse::<LogLevel>() {
            Ok(level) => logging_config.level = level,
            Err(_) => eprintln!("Invalid log level '{}', using configured level", level_str),
        }
    }

    if let Err(e) = gatehouse_logging::init_logging_from_config(&logging_config) {
        eprintln!(
            "Failed to initialize structured logging: {}, falling back to simple tracing",
            e
        );
        gatehouse_logging::init_simple_tracing(&logging_config.level.to_string())?;
    }

    Ok(())
}

/// Connect to the entity store, migrating when configured to
async fn open_store(config: &GatehouseConfig, force_migrate: bool) -> Result<EntityStore> {
    let db_config = gatehouse_storage::DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        connection_timeout: config.database.connection_timeout,
        sql_logging: config.database.sql_logging,
    };

    let database = DatabaseConnection::new(db_config)
        .await
        .context("Failed to connect to database")?;

    if force_migrate || config.database.auto_migrate {
        database
            .migrate()
            .await
            .context("Failed to run database migrations")?;
    }

    Ok(EntityStore::new(database))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", output);
    Ok(())
}

async fn handle_menu_tree(services: &RbacServices, args: &MenuTreeArgs) -> Result<()> {
    let tree = match (args.user, args.role) {
        (Some(user_id), _) => services
            .menu_access
            .build_user_menu_tree(user_id)
            .await
            .context(format!("Failed to build menu tree for user {}", user_id))?,
        (None, Some(role_id)) => services
            .menu_access
            .build_role_menu_tree(role_id)
            .await
            .context(format!("Failed to build menu tree for role {}", role_id))?,
        (None, None) => {
            let filter = MenuFilter {
                search: args.search.clone(),
                is_active: args.active,
                parent_id: None,
            };
            services
                .menu_access
                .build_complete_menu_tree(&filter)
                .await
                .context("Failed to build menu tree")?
        }
    };

    print_json(&tree)
}

/// Handle configuration validation
fn handle_config_validate(config_file: &PathBuf) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(_config) => {
            println!("Configuration file is valid");
            info!("Configuration validation passed");
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed: {}", e);
            error!("Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handle configuration display
fn handle_config_show(config_file: Option<&PathBuf>, format: &str) -> Result<()> {
    let config = load_config(config_file)?;

    match format.to_lowercase().as_str() {
        "yaml" | "yml" => {
            let yaml_output =
                serde_yaml::to_string(&config).context("Failed to serialize to YAML")?;
            println!("{}", yaml_output);
        }
        "json" => print_json(&config)?,
        _ => {
            return Err(anyhow::anyhow!(
                "Unknown output format: {}. Valid formats: yaml, json",
                format
            ));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_logging(&config, cli.log_level.as_ref())?;

    let command = match &cli.command {
        Some(Commands::Config { config_cmd }) => {
            return match config_cmd {
                ConfigCommands::Validate { config_file } => handle_config_validate(config_file),
                ConfigCommands::Show {
                    config_file,
                    format,
                } => handle_config_show(config_file.as_ref().or(cli.config.as_ref()), format),
            };
        }
        Some(command) => command,
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            return Ok(());
        }
    };

    let store = open_store(&config, matches!(command, Commands::Migrate)).await?;
    let services = RbacServices::from_config(store, &config.rbac);

    match command {
        Commands::Migrate => {
            info!("Database migrations applied");
            print_json(&serde_json::json!({ "migrated": true }))
        }
        Commands::Seed => {
            let report = services
                .seed(&config.rbac)
                .await
                .context("Failed to seed authorization data")?;
            print_json(&report)
        }
        Commands::Check { user, permission } => {
            let result = services
                .resolver
                .check(*user, permission)
                .await
                .context(format!("Failed to check '{}' for user {}", permission, user))?;
            print_json(&result)
        }
        Commands::Permissions { user } => {
            let effective = services
                .resolver
                .resolve(*user)
                .await
                .context(format!("Failed to resolve permissions for user {}", user))?;
            print_json(&effective)
        }
        Commands::MenuTree(args) => handle_menu_tree(&services, args).await,
        Commands::MenuAccess {
            user,
            menu,
            capability,
        } => {
            let capability: Capability = capability
                .parse()
                .context("Capability must be one of view, edit, delete, export")?;
            let decision = services
                .menu_access
                .check_menu_access(*user, *menu, capability)
                .await
                .context(format!("Failed to check menu {} for user {}", menu, user))?;
            print_json(&decision)
        }
        Commands::Matrix => {
            let matrix = services
                .menu_access
                .permission_matrix()
                .await
                .context("Failed to build permission matrix")?;
            print_json(&matrix)
        }
        Commands::Stats => {
            let stats = services
                .menu_access
                .menu_statistics()
                .await
                .context("Failed to compute menu statistics")?;
            print_json(&stats)
        }
        Commands::Config { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_config_validate_accepts_partial_file() {
        let file = write_config("database:\n  url: \"sqlite::memory:\"\n");
        assert!(handle_config_validate(&file.path().to_path_buf()).is_ok());
    }

    #[test]
    fn test_config_validate_rejects_bad_permission() {
        let file = write_config("rbac:\n  seed_permissions:\n    - \"no-colon\"\n");
        assert!(handle_config_validate(&file.path().to_path_buf()).is_err());
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let missing = PathBuf::from("/nonexistent/gatehouse.yaml");
        let config = load_config(Some(&missing)).unwrap();
        assert!(config.rbac.audit.enabled);
    }

    #[tokio::test]
    async fn test_open_store_migrates_and_seeds() {
        let mut config = GatehouseConfig::default();
        config.database.url = "sqlite::memory:".to_string();

        let store = open_store(&config, true).await.unwrap();
        let services = RbacServices::from_config(store, &config.rbac);

        let report = services.seed(&config.rbac).await.unwrap();
        assert!(!report.is_noop());
        assert!(services.seed(&config.rbac).await.unwrap().is_noop());
    }
}
