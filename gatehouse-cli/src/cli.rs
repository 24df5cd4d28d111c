//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gatehouse", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Create the configured permissions and system roles
    Seed,

    /// Check one permission for a user
    Check {
        #[arg(long, value_name = "ID")]
        user: i32,

        /// Permission name in `resource:action` form
        #[arg(long, value_name = "NAME")]
        permission: String,
    },

    /// Show the effective permission set of a user
    Permissions {
        #[arg(long, value_name = "ID")]
        user: i32,
    },

    /// Print a menu tree
    MenuTree(MenuTreeArgs),

    /// Check a capability on a menu for a user
    MenuAccess {
        #[arg(long, value_name = "ID")]
        user: i32,

        #[arg(long, value_name = "ID")]
        menu: i32,

        /// view, edit, delete or export
        #[arg(long, value_name = "CAPABILITY", default_value = "view")]
        capability: String,
    },

    /// Print the role x menu capability matrix
    Matrix,

    /// Print menu tree statistics
    Stats,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

/// Whose tree to build; without either flag the full administrative tree is shown
#[derive(Args)]
pub struct MenuTreeArgs {
    /// Menus visible to this user
    #[arg(long, value_name = "ID")]
    pub user: Option<i32>,

    /// Menus visible to this role
    #[arg(long, value_name = "ID", conflicts_with = "user")]
    pub role: Option<i32>,

    /// Title filter for the administrative tree
    #[arg(long, value_name = "TEXT")]
    pub search: Option<String>,

    /// Include only active (true) or inactive (false) menus in the administrative tree
    #[arg(long, value_name = "BOOL")]
    pub active: Option<bool>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Show current configuration in use
    Show {
        /// Path to configuration file (optional, uses default loading logic)
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,

        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from([
            "gatehouse",
            "--log-level",
            "debug",
            "check",
            "--user",
            "7",
            "--permission",
            "report:view",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Some(Commands::Check { user, permission }) => {
                assert_eq!(user, 7);
                assert_eq!(permission, "report:view");
            }
            _ => panic!("expected check command"),
        }
    }

    #[test]
    fn test_menu_tree_user_and_role_conflict() {
        assert!(
            Cli::try_parse_from(["gatehouse", "menu-tree", "--user", "1", "--role", "2"]).is_err()
        );
        assert!(Cli::try_parse_from(["gatehouse", "menu-tree", "--role", "2"]).is_ok());
    }

    #[test]
    fn test_menu_access_default_capability() {
        let cli = Cli::try_parse_from([
            "gatehouse",
            "menu-access",
            "--user",
            "1",
            "--menu",
            "3",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::MenuAccess { capability, .. }) => assert_eq!(capability, "view"),
            _ => panic!("expected menu-access command"),
        }
    }
}
