//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use gatehouse_config::RbacConfig;
use gatehouse_rbac::{
    AuditSink, CapabilityFlags, CapabilityUpdate, MenuPermissionUpdate, NewMenu, NewPermission,
    NewRole, NewUser, NoopAuditSink, RbacServices,
};
use gatehouse_storage::testing::TestDatabase;

pub const ADMIN: i32 = 1;

/// Migrated in-memory store with every service wired up
pub struct TestEnv {
    pub db: TestDatabase,
    pub rbac: RbacServices,
}

impl TestEnv {
    pub async fn new() -> Result<Self> {
        Self::with_audit(Arc::new(NoopAuditSink)).await
    }

    pub async fn with_audit(audit: Arc<dyn AuditSink>) -> Result<Self> {
        let db = TestDatabase::new_in_memory().await?;
        let rbac = RbacServices::new(db.store(), audit, &RbacConfig::default());
        Ok(Self { db, rbac })
    }

    pub async fn permission(&self, name: &str) -> Result<i32> {
        let permission = self
            .rbac
            .permissions
            .create_permission(
                ADMIN,
                NewPermission {
                    name: name.to_string(),
                    description: None,
                },
            )
            .await?;
        Ok(permission.id)
    }

    /// Create a role holding the named permissions, creating them as needed
    pub async fn role(&self, name: &str, permissions: &[&str]) -> Result<i32> {
        let mut permission_ids = Vec::new();
        for permission in permissions {
            let id = match self.rbac.permissions.find_by_name(permission).await {
                Ok(existing) => existing.id,
                Err(e) if e.is_not_found() => self.permission(permission).await?,
                Err(e) => return Err(e.into()),
            };
            permission_ids.push(id);
        }

        let details = self
            .rbac
            .roles
            .create_role(
                ADMIN,
                NewRole {
                    name: name.to_string(),
                    description: None,
                    permission_ids,
                },
            )
            .await?;
        Ok(details.role.id)
    }

    pub async fn user(&self, username: &str, role_ids: &[i32]) -> Result<i32> {
        let user = self
            .rbac
            .users
            .create_user(
                ADMIN,
                NewUser {
                    username: username.to_string(),
                    ..Default::default()
                },
            )
            .await?;
        if !role_ids.is_empty() {
            self.rbac
                .users
                .replace_user_roles(ADMIN, user.id, role_ids)
                .await?;
        }
        Ok(user.id)
    }

    pub async fn superuser(&self, username: &str) -> Result<i32> {
        let user = self
            .rbac
            .users
            .create_user(
                ADMIN,
                NewUser {
                    username: username.to_string(),
                    is_superuser: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(user.id)
    }

    pub async fn menu(&self, title: &str, parent: Option<i32>) -> Result<i32> {
        let mut new_menu = NewMenu::new(title);
        new_menu.parent_id = parent;
        Ok(self.rbac.menus.create_menu(ADMIN, new_menu).await?.id)
    }

    /// Set exactly these flags for one role on one menu
    pub async fn grant(&self, role_id: i32, menu_id: i32, flags: CapabilityFlags) -> Result<()> {
        let result = self
            .rbac
            .menu_access
            .update_role_menu_permissions(
                ADMIN,
                role_id,
                &[MenuPermissionUpdate {
                    menu_id,
                    flags: CapabilityUpdate::exact(flags),
                }],
                false,
            )
            .await?;
        anyhow::ensure!(result.all_succeeded(), "grant failed: {:?}", result.failed);
        Ok(())
    }
}
