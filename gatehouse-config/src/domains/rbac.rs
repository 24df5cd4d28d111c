//! Role, permission seeding and audit configuration

use crate::error::ConfigResult;
use crate::validation::{
    validate_permission_name, validate_positive, validate_required_string, Validatable,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Authorization engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    /// Maximum accepted role name length
    #[serde(default = "default_role_name_max_length")]
    pub role_name_max_length: usize,

    /// Permissions created by the bootstrap seeder
    #[serde(default)]
    pub seed_permissions: Vec<String>,

    /// Built-in roles created with `is_system = true`
    #[serde(default)]
    pub system_roles: Vec<SystemRoleConfig>,

    /// Audit collaborator settings
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Definition of a built-in role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemRoleConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Permission names attached to the role; each must also be seeded
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Audit collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub sink: AuditSinkKind,
}

/// Where audit events are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Emit audit events as tracing records
    #[default]
    Tracing,
    /// Persist audit events to the `audit_logs` table
    Database,
}

impl Default for RbacConfig {
    fn default() -> Self {
        let seed_permissions: Vec<String> = [
            "*:*",
            "user:read",
            "user:create",
            "user:update",
            "user:delete",
            "role:read",
            "role:create",
            "role:update",
            "role:delete",
            "permission:read",
            "menu:read",
            "menu:update",
            "report:view",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let system_roles = vec![
            SystemRoleConfig {
                name: "administrator".to_string(),
                description: Some("Built-in administrative role".to_string()),
                permissions: vec!["*:*".to_string()],
            },
            SystemRoleConfig {
                name: "viewer".to_string(),
                description: Some("Built-in read-only baseline role".to_string()),
                permissions: vec![
                    "user:read".to_string(),
                    "role:read".to_string(),
                    "menu:read".to_string(),
                    "report:view".to_string(),
                ],
            },
        ];

        Self {
            role_name_max_length: default_role_name_max_length(),
            seed_permissions,
            system_roles,
            audit: AuditConfig::default(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: AuditSinkKind::Tracing,
        }
    }
}

impl fmt::Display for AuditSinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditSinkKind::Tracing => f.write_str("tracing"),
            AuditSinkKind::Database => f.write_str("database"),
        }
    }
}

impl FromStr for AuditSinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tracing" => Ok(AuditSinkKind::Tracing),
            "database" | "db" => Ok(AuditSinkKind::Database),
            _ => Err(format!("Invalid audit sink: {}", s)),
        }
    }
}

impl Validatable for RbacConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.role_name_max_length,
            "role_name_max_length",
            self.domain_name(),
        )?;

        let mut seeded = HashSet::new();
        for name in &self.seed_permissions {
            validate_permission_name(name, "seed_permissions", self.domain_name())?;
            seeded.insert(name.as_str());
        }

        let mut role_names = HashSet::new();
        for role in &self.system_roles {
            validate_required_string(&role.name, "system_roles.name", self.domain_name())?;

            if role.name.len() > self.role_name_max_length {
                return Err(self.validation_error(format!(
                    "system role '{}' exceeds {} characters",
                    role.name, self.role_name_max_length
                )));
            }

            if !role_names.insert(role.name.as_str()) {
                return Err(self.validation_error(format!(
                    "system role '{}' is defined more than once",
                    role.name
                )));
            }

            for permission in &role.permissions {
                if !seeded.contains(permission.as_str()) {
                    return Err(self.validation_error(format!(
                        "system role '{}' references unseeded permission '{}'",
                        role.name, permission
                    )));
                }
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "rbac"
    }
}

fn default_role_name_max_length() -> usize {
    100
}
