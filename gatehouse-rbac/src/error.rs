//! Error types for RBAC operations

use serde::Serialize;
use thiserror::Error;

/// Result type for RBAC operations
pub type RbacResult<T> = Result<T, RbacError>;

/// Coarse error category callers branch on and translate to their transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Forbidden,
    Internal,
}

impl ErrorKind {
    /// Conventional HTTP status for this kind
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Validation => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::Internal => 500,
        }
    }
}

/// RBAC-specific errors
#[derive(Error, Debug)]
pub enum RbacError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: i32 },

    #[error("Role not found: {role_id}")]
    RoleNotFound { role_id: i32 },

    #[error("Permission not found: {permission}")]
    PermissionNotFound { permission: String },

    #[error("Menu not found: {menu_id}")]
    MenuNotFound { menu_id: i32 },

    /// Some menus of a batch do not exist; nothing was written
    #[error("Menus not found: {menu_ids:?}")]
    MenusNotFound { menu_ids: Vec<i32> },

    #[error("Role name already exists: {name}")]
    DuplicateRoleName { name: String },

    #[error("Permission already exists: {name}")]
    DuplicatePermission { name: String },

    #[error("Username already exists: {username}")]
    DuplicateUsername { username: String },

    #[error("Invalid permission name '{name}': {reason}")]
    InvalidPermissionName { name: String, reason: String },

    #[error("Invalid capability '{value}', expected one of view, edit, delete, export")]
    InvalidCapability { value: String },

    /// Permission ids that do not resolve; the permission set was left untouched
    #[error("Unknown permission ids: {permission_ids:?}")]
    UnknownPermissions { permission_ids: Vec<i32> },

    /// Role ids that do not resolve; the role set was left untouched
    #[error("Unknown role ids: {role_ids:?}")]
    UnknownRoles { role_ids: Vec<i32> },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("User {user_id} lacks permission '{permission}'")]
    PermissionDenied { user_id: i32, permission: String },

    #[error("System role '{name}' cannot be deleted")]
    SystemRoleProtected { name: String },

    #[error("Role {role_id} is still assigned to {user_count} user(s)")]
    RoleInUse { role_id: i32, user_count: u64 },

    #[error("Permission '{name}' is still granted to {role_count} role(s)")]
    PermissionInUse { name: String, role_count: u64 },

    #[error("Menu {menu_id} has {child_count} child menu(s)")]
    MenuHasChildren { menu_id: i32, child_count: u64 },

    /// Moving the menu under the parent would make it its own ancestor
    #[error("Menu {menu_id} cannot be placed under menu {parent_id}: circular reference")]
    CircularMenuReference { menu_id: i32, parent_id: i32 },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RbacError {
    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound { .. }
            | Self::RoleNotFound { .. }
            | Self::PermissionNotFound { .. }
            | Self::MenuNotFound { .. }
            | Self::MenusNotFound { .. } => ErrorKind::NotFound,

            Self::DuplicateRoleName { .. }
            | Self::DuplicatePermission { .. }
            | Self::DuplicateUsername { .. } => ErrorKind::Conflict,

            Self::InvalidPermissionName { .. }
            | Self::InvalidCapability { .. }
            | Self::UnknownPermissions { .. }
            | Self::UnknownRoles { .. }
            | Self::Validation { .. }
            | Self::CircularMenuReference { .. } => ErrorKind::Validation,

            Self::PermissionDenied { .. }
            | Self::SystemRoleProtected { .. }
            | Self::RoleInUse { .. }
            | Self::PermissionInUse { .. }
            | Self::MenuHasChildren { .. } => ErrorKind::Forbidden,

            Self::Database(_) | Self::Serialization(_) | Self::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
