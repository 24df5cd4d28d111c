//! Permission administration
//!
//! The stored `resource` and `action` columns are always re-derived from the
//! name, so the two representations cannot drift apart.

use std::sync::Arc;

use chrono::Utc;
use gatehouse_storage::entities::{permissions, Permission};
use gatehouse_storage::sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use gatehouse_storage::{store, EntityStore};
use serde_json::json;
use tracing::info;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{RbacError, RbacResult};
use crate::models::{normalize_text, NewPermission, PermissionName, PermissionUpdate};

#[derive(Clone)]
pub struct PermissionManager {
    store: EntityStore,
    audit: Arc<dyn AuditSink>,
}

impl PermissionManager {
    pub fn new(store: EntityStore, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn create_permission(
        &self,
        actor_id: i32,
        new_permission: NewPermission,
    ) -> RbacResult<Permission> {
        let name = PermissionName::parse(new_permission.name.trim())?;
        let db = self.store.connection();

        if store::find_permission_by_name(db, &name.to_string())
            .await?
            .is_some()
        {
            return Err(RbacError::DuplicatePermission {
                name: name.to_string(),
            });
        }

        let now = Utc::now();
        let permission = permissions::ActiveModel {
            name: Set(name.to_string()),
            resource: Set(name.resource.clone()),
            action: Set(name.action.clone()),
            description: Set(normalize_text(new_permission.description)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(permission_id = permission.id, name = %permission.name, "Created permission");
        self.audit.record(
            AuditEvent::new(actor_id, "permission.create", "permission")
                .with_resource_id(permission.id)
                .with_details(json!({ "name": permission.name })),
        );

        Ok(permission)
    }

    /// Rename and/or re-describe a permission
    pub async fn update_permission(
        &self,
        actor_id: i32,
        permission_id: i32,
        update: PermissionUpdate,
    ) -> RbacResult<Permission> {
        let txn = self.store.begin().await?;

        let existing = store::find_permission(&txn, permission_id)
            .await?
            .ok_or_else(|| RbacError::PermissionNotFound {
                permission: permission_id.to_string(),
            })?;

        let previous_name = existing.name.clone();
        let mut active: permissions::ActiveModel = existing.into();

        if let Some(requested) = update.name {
            let name = PermissionName::parse(requested.trim())?;
            let canonical = name.to_string();

            if canonical != previous_name {
                if let Some(other) = store::find_permission_by_name(&txn, &canonical).await? {
                    if other.id != permission_id {
                        return Err(RbacError::DuplicatePermission { name: canonical });
                    }
                }
                active.name = Set(canonical);
                active.resource = Set(name.resource);
                active.action = Set(name.action);
            }
        }

        if let Some(description) = update.description {
            active.description = Set(normalize_text(description));
        }

        active.updated_at = Set(Utc::now());
        let permission = active.update(&txn).await?;
        txn.commit().await?;

        info!(permission_id, name = %permission.name, "Updated permission");
        self.audit.record(
            AuditEvent::new(actor_id, "permission.update", "permission")
                .with_resource_id(permission_id)
                .with_details(json!({ "previous_name": previous_name, "name": permission.name })),
        );

        Ok(permission)
    }

    /// Delete a permission that no role holds
    pub async fn delete_permission(&self, actor_id: i32, permission_id: i32) -> RbacResult<()> {
        let txn = self.store.begin().await?;

        let permission = store::find_permission(&txn, permission_id)
            .await?
            .ok_or_else(|| RbacError::PermissionNotFound {
                permission: permission_id.to_string(),
            })?;

        let role_count = store::count_permission_roles(&txn, permission_id).await?;
        if role_count > 0 {
            return Err(RbacError::PermissionInUse {
                name: permission.name,
                role_count,
            });
        }

        permissions::Entity::delete_by_id(permission_id)
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(permission_id, name = %permission.name, "Deleted permission");
        self.audit.record(
            AuditEvent::new(actor_id, "permission.delete", "permission")
                .with_resource_id(permission_id)
                .with_details(json!({ "name": permission.name })),
        );

        Ok(())
    }

    pub async fn get_permission(&self, permission_id: i32) -> RbacResult<Permission> {
        store::find_permission(self.store.connection(), permission_id)
            .await?
            .ok_or_else(|| RbacError::PermissionNotFound {
                permission: permission_id.to_string(),
            })
    }

    pub async fn find_by_name(&self, name: &str) -> RbacResult<Permission> {
        let canonical = PermissionName::parse(name.trim())?.to_string();
        store::find_permission_by_name(self.store.connection(), &canonical)
            .await?
            .ok_or(RbacError::PermissionNotFound {
                permission: canonical,
            })
    }

    /// Permissions ordered by name, optionally restricted to one resource
    pub async fn list_permissions(&self, resource: Option<&str>) -> RbacResult<Vec<Permission>> {
        let mut query = permissions::Entity::find();
        if let Some(resource) = resource {
            query = query.filter(permissions::Column::Resource.eq(resource));
        }

        Ok(query
            .order_by_asc(permissions::Column::Name)
            .all(self.store.connection())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MockAuditSink;
    use crate::models::NewRole;
    use crate::roles::RoleManager;
    use gatehouse_storage::testing::TestDatabase;

    fn silent_audit() -> Arc<dyn AuditSink> {
        let mut audit = MockAuditSink::new();
        audit.expect_record().returning(|_| ());
        Arc::new(audit)
    }

    fn new_permission(name: &str) -> NewPermission {
        NewPermission {
            name: name.to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_create_derives_resource_and_action() {
        let db = TestDatabase::new_in_memory().await.unwrap();
        let manager = PermissionManager::new(db.store(), silent_audit());

        let created = manager
            .create_permission(1, new_permission("report:export"))
            .await
            .unwrap();
        assert_eq!(created.resource, "report");
        assert_eq!(created.action, "export");

        assert!(matches!(
            manager.create_permission(1, new_permission("report:export")).await,
            Err(RbacError::DuplicatePermission { .. })
        ));
        assert!(matches!(
            manager.create_permission(1, new_permission("report")).await,
            Err(RbacError::InvalidPermissionName { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_keeps_columns_in_sync() {
        let db = TestDatabase::new_in_memory().await.unwrap();
        let manager = PermissionManager::new(db.store(), silent_audit());

        let created = manager
            .create_permission(1, new_permission("order:view"))
            .await
            .unwrap();
        let renamed = manager
            .update_permission(
                1,
                created.id,
                PermissionUpdate {
                    name: Some("invoice:*".to_string()),
                    description: Some(Some("Any invoice action".to_string())),
                },
            )
            .await
            .unwrap();

        assert_eq!(renamed.name, "invoice:*");
        assert_eq!(renamed.resource, "invoice");
        assert_eq!(renamed.action, "*");
        assert_eq!(renamed.description.as_deref(), Some("Any invoice action"));
    }

    #[tokio::test]
    async fn test_delete_in_use_is_forbidden() {
        let db = TestDatabase::new_in_memory().await.unwrap();
        let audit = silent_audit();
        let manager = PermissionManager::new(db.store(), audit.clone());
        let roles = RoleManager::new(db.store(), audit);

        let permission = manager
            .create_permission(1, new_permission("user:read"))
            .await
            .unwrap();
        roles
            .create_role(
                1,
                NewRole {
                    name: "reader".to_string(),
                    permission_ids: vec![permission.id],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        match manager.delete_permission(1, permission.id).await {
            Err(RbacError::PermissionInUse { role_count, .. }) => assert_eq!(role_count, 1),
            other => panic!("expected PermissionInUse, got {:?}", other),
        }

        let unused = manager
            .create_permission(1, new_permission("user:purge"))
            .await
            .unwrap();
        manager.delete_permission(1, unused.id).await.unwrap();
        assert!(manager.get_permission(unused.id).await.unwrap_err().is_not_found());

        let users = manager.list_permissions(Some("user")).await.unwrap();
        assert_eq!(users.len(), 1);
    }
}
