//! Integration tests for gatehouse-config

use gatehouse_config::*;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = GatehouseConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("GATEHOUSE_DATABASE_URL", Some("sqlite::memory:")),
        ("GATEHOUSE_DATABASE_MAX_CONNECTIONS", Some("1")),
        ("GATEHOUSE_DATABASE_CONNECTION_TIMEOUT", Some("5")),
        ("GATEHOUSE_LOG_LEVEL", Some("debug")),
        ("GATEHOUSE_AUDIT_SINK", Some("database")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 1);
        assert_eq!(config.database.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.rbac.audit.sink, AuditSinkKind::Database);
    });
}

#[test]
fn test_invalid_env_override() {
    with_vars(vec![("GATEHOUSE_LOG_LEVEL", Some("shouting"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    });
}

#[test]
fn test_custom_prefix() {
    with_vars(vec![("ACME_LOG_FORMAT", Some("json"))], || {
        let config = ConfigLoader::with_prefix("ACME").from_env().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_yaml_config_serialization() {
    let config = GatehouseConfig::default();
    let yaml = serde_yaml::to_string(&config).unwrap();

    let parsed: GatehouseConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed.rbac.system_roles, config.rbac.system_roles);
}

#[test]
fn test_load_from_file() {
    let yaml = r#"
database:
  url: "sqlite::memory:"
  max_connections: 1
  connection_timeout: 10

logging:
  level: warn
  format: compact
  directives:
    - "sea_orm=error"

rbac:
  role_name_max_length: 32
  seed_permissions:
    - "report:*"
    - "order:view"
  system_roles:
    - name: auditor
      permissions:
        - "report:*"
  audit:
    enabled: false
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(Vec::<(&str, Option<&str>)>::new(), || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();

        assert_eq!(config.database.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.rbac.role_name_max_length, 32);
        assert_eq!(config.rbac.system_roles.len(), 1);
        assert_eq!(config.rbac.system_roles[0].name, "auditor");
        assert!(!config.rbac.audit.enabled);
    });
}

#[test]
fn test_file_with_invalid_permission_rejected() {
    let yaml = r#"
rbac:
  seed_permissions:
    - "not-a-permission"
  system_roles: []
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let result = ConfigLoader::new().from_file(file.path());
    assert!(matches!(result, Err(ConfigError::DomainError { .. })));
}
