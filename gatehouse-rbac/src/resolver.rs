//! Permission resolution
//!
//! [`resolve`] and [`check`] are pure functions over a user's role grants;
//! [`PermissionService`] loads those grants from the entity store per call.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use gatehouse_storage::sea_orm::ConnectionTrait;
use gatehouse_storage::{store, EntityStore};
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::{RbacError, RbacResult};
use crate::models::{GrantMatch, PermissionName};

/// Permissions held through a single role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrants {
    pub role_id: i32,
    pub role_name: String,
    pub permissions: Vec<PermissionName>,
}

/// Union of everything a user holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectivePermissions {
    pub permissions: BTreeSet<String>,
    pub is_superuser: bool,
}

/// Why a check was granted or denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantReason {
    Superuser,
    Role(String),
    RoleWildcard(String),
    Denied,
}

impl fmt::Display for GrantReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantReason::Superuser => f.write_str("superuser"),
            GrantReason::Role(name) => write!(f, "role:{}", name),
            GrantReason::RoleWildcard(name) => write!(f, "role:{}(wildcard)", name),
            GrantReason::Denied => f.write_str("denied"),
        }
    }
}

impl Serialize for GrantReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionCheck {
    pub granted: bool,
    pub reason: GrantReason,
}

impl PermissionCheck {
    fn granted(reason: GrantReason) -> Self {
        Self {
            granted: true,
            reason,
        }
    }

    fn denied() -> Self {
        Self {
            granted: false,
            reason: GrantReason::Denied,
        }
    }
}

/// Union of the permission names held through `roles`
pub fn resolve(is_superuser: bool, roles: &[RoleGrants]) -> EffectivePermissions {
    let permissions = roles
        .iter()
        .flat_map(|role| role.permissions.iter().map(ToString::to_string))
        .collect();

    EffectivePermissions {
        permissions,
        is_superuser,
    }
}

/// Decide whether `requested` is granted.
///
/// Roles are consulted in slice order and the first granting role is the
/// reason. Within a role an exact match is reported ahead of a wildcard one.
pub fn check(
    is_superuser: bool,
    roles: &[RoleGrants],
    requested: &PermissionName,
) -> PermissionCheck {
    if is_superuser {
        return PermissionCheck::granted(GrantReason::Superuser);
    }

    for role in roles {
        let mut best: Option<GrantMatch> = None;
        for held in &role.permissions {
            match held.grants(requested) {
                Some(GrantMatch::Exact) => {
                    best = Some(GrantMatch::Exact);
                    break;
                }
                Some(GrantMatch::Wildcard) => best = Some(GrantMatch::Wildcard),
                None => {}
            }
        }

        match best {
            Some(GrantMatch::Exact) => {
                return PermissionCheck::granted(GrantReason::Role(role.role_name.clone()))
            }
            Some(GrantMatch::Wildcard) => {
                return PermissionCheck::granted(GrantReason::RoleWildcard(role.role_name.clone()))
            }
            None => {}
        }
    }

    PermissionCheck::denied()
}

/// Load the grants of `role_ids`, ordered by ascending role id
pub async fn load_role_grants<C: ConnectionTrait>(
    db: &C,
    role_ids: &[i32],
) -> RbacResult<Vec<RoleGrants>> {
    let roles = store::find_roles_by_ids(db, role_ids).await?;
    let mut by_role = store::find_permissions_for_roles(db, role_ids).await?;

    let grants = roles
        .into_iter()
        .map(|role| {
            let permissions = by_role
                .remove(&role.id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|p| match PermissionName::parse(&p.name) {
                    Ok(name) => Some(name),
                    Err(e) => {
                        warn!(permission_id = p.id, "Skipping malformed stored permission: {}", e);
                        None
                    }
                })
                .collect();

            RoleGrants {
                role_id: role.id,
                role_name: role.name,
                permissions,
            }
        })
        .collect();

    Ok(grants)
}

/// Resolves permissions for users from current committed state
#[derive(Clone)]
pub struct PermissionService {
    store: EntityStore,
}

impl PermissionService {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Effective permission set of a user
    pub async fn resolve(&self, user_id: i32) -> RbacResult<EffectivePermissions> {
        let db = self.store.connection();
        let user = store::find_user(db, user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })?;

        let role_ids = store::find_role_ids_for_user(db, user_id).await?;
        let grants = load_role_grants(db, &role_ids).await?;

        Ok(resolve(user.is_superuser, &grants))
    }

    /// Check a single permission for a user
    pub async fn check(&self, user_id: i32, permission: &str) -> RbacResult<PermissionCheck> {
        let requested = PermissionName::parse(permission)?;
        let db = self.store.connection();

        let user = store::find_user(db, user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })?;

        if user.is_superuser {
            debug!(user_id, permission, "Superuser short-circuit");
            return Ok(check(true, &[], &requested));
        }

        let role_ids = store::find_role_ids_for_user(db, user_id).await?;
        let grants = load_role_grants(db, &role_ids).await?;
        let result = check(false, &grants, &requested);

        debug!(
            user_id,
            permission,
            granted = result.granted,
            reason = %result.reason,
            "Permission check"
        );

        Ok(result)
    }

    /// Check several permissions against one snapshot of the user's grants
    pub async fn check_many(
        &self,
        user_id: i32,
        permissions: &[&str],
    ) -> RbacResult<Vec<(String, PermissionCheck)>> {
        let requested = permissions
            .iter()
            .map(|p| PermissionName::parse(p))
            .collect::<RbacResult<Vec<_>>>()?;

        let db = self.store.connection();
        let user = store::find_user(db, user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })?;

        let grants = if user.is_superuser {
            Vec::new()
        } else {
            let role_ids = store::find_role_ids_for_user(db, user_id).await?;
            load_role_grants(db, &role_ids).await?
        };

        Ok(requested
            .iter()
            .map(|name| (name.to_string(), check(user.is_superuser, &grants, name)))
            .collect())
    }
}

/// Permission decisions for callers that only need a yes or no
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn check_permission(&self, user_id: i32, permission: &str) -> RbacResult<PermissionCheck>;

    /// Fail with `Forbidden` unless the permission is granted
    async fn require(&self, user_id: i32, permission: &str) -> RbacResult<GrantReason> {
        let result = self.check_permission(user_id, permission).await?;
        if result.granted {
            Ok(result.reason)
        } else {
            warn!(user_id, permission, "Permission denied");
            Err(RbacError::PermissionDenied {
                user_id,
                permission: permission.to_string(),
            })
        }
    }
}

#[async_trait]
impl Authorizer for PermissionService {
    async fn check_permission(
        &self,
        user_id: i32,
        permission: &str,
    ) -> RbacResult<PermissionCheck> {
        self.check(user_id, permission).await
    }
}
