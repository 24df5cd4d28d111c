//! Role-based authorization resolution engine
//!
//! This crate decides what a user may do and which navigation menus they see:
//! - Permission resolution with superuser and `resource:action` wildcard rules
//! - Role, permission and user-role administration
//! - Menu tree maintenance with acyclicity guarantees
//! - Per-menu capability aggregation, access checks and the role x menu matrix
//!
//! Every mutating call takes the acting user's id explicitly and reports an
//! audit event through an [`AuditSink`] after it commits.

pub mod audit;
pub mod bootstrap;
pub mod error;
pub mod menu_access;
pub mod menus;
pub mod models;
pub mod permissions;
pub mod resolver;
pub mod roles;
pub mod tree;
pub mod users;

use std::sync::Arc;

use gatehouse_config::RbacConfig;
use gatehouse_storage::EntityStore;

pub use audit::{
    audit_sink_from_config, AuditEvent, AuditSink, DatabaseAuditSink, NoopAuditSink,
    TracingAuditSink,
};
pub use bootstrap::SeedReport;
pub use error::{ErrorKind, RbacError, RbacResult};
pub use menu_access::MenuPermissionService;
pub use menus::MenuTreeManager;
pub use models::{
    BulkFailure, BulkResult, Capability, CapabilityFlags, CapabilityUpdate, CloneRoleOptions,
    MenuAccessDecision, MenuFilter, MenuNode, MenuOrder, MenuPermissionUpdate, MenuStatistics,
    MenuUpdate, NewMenu, NewPermission, NewRole, NewUser, PermissionMatrix, PermissionName,
    PermissionUpdate, RoleDetails, RoleUpdate, UserDetails, SYSTEM_ACTOR, WILDCARD,
};
pub use permissions::PermissionManager;
pub use resolver::{
    Authorizer, EffectivePermissions, GrantReason, PermissionCheck, PermissionService,
};
pub use roles::RoleManager;
pub use tree::MenuIndex;
pub use users::UserManager;

/// Every service of the engine wired to one store and one audit sink
#[derive(Clone)]
pub struct RbacServices {
    store: EntityStore,
    pub resolver: PermissionService,
    pub roles: RoleManager,
    pub permissions: PermissionManager,
    pub users: UserManager,
    pub menus: MenuTreeManager,
    pub menu_access: MenuPermissionService,
}

impl RbacServices {
    pub fn new(store: EntityStore, audit: Arc<dyn AuditSink>, config: &RbacConfig) -> Self {
        Self {
            resolver: PermissionService::new(store.clone()),
            roles: RoleManager::new(store.clone(), audit.clone())
                .with_max_name_length(config.role_name_max_length),
            permissions: PermissionManager::new(store.clone(), audit.clone()),
            users: UserManager::new(store.clone(), audit.clone()),
            menus: MenuTreeManager::new(store.clone(), audit.clone()),
            menu_access: MenuPermissionService::new(store.clone(), audit),
            store,
        }
    }

    /// Build the services with the audit sink selected by `config.audit`
    pub fn from_config(store: EntityStore, config: &RbacConfig) -> Self {
        let audit = audit_sink_from_config(&config.audit, &store);
        Self::new(store, audit, config)
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Create the configured permissions and system roles if missing
    pub async fn seed(&self, config: &RbacConfig) -> RbacResult<SeedReport> {
        bootstrap::seed(&self.store, config).await
    }
}
