//! Relational storage for the gatehouse authorization engine
//!
//! SeaORM entities and migrations for users, roles, permissions, menus and the
//! audit trail, plus the read queries the resolution layer is built on.

pub mod config;
pub mod connection;
pub mod entities;
pub mod migrations;
pub mod store;

#[cfg(feature = "testing")]
pub mod testing;

pub use config::DatabaseConfig;
pub use connection::{DatabaseConnection, DatabaseError};
pub use store::{
    EntityStore, MenuPermissionQuery, MenuQuery, RoleWithPermissions, UserWithRoles,
};

// Re-export Sea-ORM so downstream crates stay on the same version
pub use sea_orm;
