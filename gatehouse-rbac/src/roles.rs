//! Role administration
//!
//! Single-role mutations run inside one transaction and are all-or-nothing.
//! Bulk operations attempt every item independently and report a
//! [`BulkResult`].

use std::sync::Arc;

use chrono::Utc;
use gatehouse_storage::entities::{
    menu_permissions, role_permissions, roles, user_roles, users, Role, User,
};
use gatehouse_storage::sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use gatehouse_storage::{store, EntityStore};
use serde_json::json;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{RbacError, RbacResult};
use crate::models::{
    dedup_ids, normalize_text, BulkResult, CloneRoleOptions, NewRole, RoleDetails, RoleUpdate,
};

pub const DEFAULT_ROLE_NAME_MAX_LENGTH: usize = 100;

/// Role manager for handling role operations
#[derive(Clone)]
pub struct RoleManager {
    store: EntityStore,
    audit: Arc<dyn AuditSink>,
    max_name_length: usize,
}

impl RoleManager {
    pub fn new(store: EntityStore, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            max_name_length: DEFAULT_ROLE_NAME_MAX_LENGTH,
        }
    }

    pub fn with_max_name_length(mut self, max_name_length: usize) -> Self {
        self.max_name_length = max_name_length;
        self
    }

    /// Validate role name, returning it trimmed
    pub fn validate_role_name(&self, role_name: &str) -> RbacResult<String> {
        let name = role_name.trim();

        if name.is_empty() {
            return Err(RbacError::validation("Role name cannot be empty"));
        }

        if name.chars().count() > self.max_name_length {
            return Err(RbacError::validation(format!(
                "Role name cannot exceed {} characters",
                self.max_name_length
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ' ' | '.'))
        {
            return Err(RbacError::validation(
                "Role name may only contain letters, digits, spaces, '_', '-' and '.'",
            ));
        }

        Ok(name.to_string())
    }

    pub async fn create_role(&self, actor_id: i32, new_role: NewRole) -> RbacResult<RoleDetails> {
        let name = self.validate_role_name(&new_role.name)?;
        let permission_ids = dedup_ids(&new_role.permission_ids);

        let txn = self.store.begin().await?;

        if store::find_role_by_name(&txn, &name).await?.is_some() {
            return Err(RbacError::DuplicateRoleName { name });
        }
        ensure_permissions_exist(&txn, &permission_ids).await?;

        let now = Utc::now();
        let role = roles::ActiveModel {
            name: Set(name),
            description: Set(normalize_text(new_role.description)),
            is_system: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        insert_grants(&txn, role.id, &permission_ids, actor_id).await?;
        txn.commit().await?;

        info!(role_id = role.id, name = %role.name, "Created role");
        self.audit.record(
            AuditEvent::new(actor_id, "role.create", "role")
                .with_resource_id(role.id)
                .with_details(json!({ "name": role.name, "permission_ids": permission_ids })),
        );

        self.get_role(role.id).await
    }

    /// Rename, re-describe and/or replace the permission set of a role.
    ///
    /// The permission set is replaced wholesale: every id must resolve or the
    /// call fails with nothing applied.
    pub async fn update_role(
        &self,
        actor_id: i32,
        role_id: i32,
        update: RoleUpdate,
    ) -> RbacResult<RoleDetails> {
        let txn = self.store.begin().await?;

        let role = store::find_role(&txn, role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;

        let mut details = serde_json::Map::new();
        let mut active: roles::ActiveModel = role.clone().into();

        if let Some(requested) = update.name {
            let name = self.validate_role_name(&requested)?;
            if name != role.name {
                if let Some(existing) = store::find_role_by_name(&txn, &name).await? {
                    if existing.id != role_id {
                        return Err(RbacError::DuplicateRoleName { name });
                    }
                }
                details.insert("previous_name".into(), json!(role.name));
                details.insert("name".into(), json!(name));
                active.name = Set(name);
            }
        }

        if let Some(description) = update.description {
            active.description = Set(normalize_text(description));
            details.insert("description_changed".into(), json!(true));
        }

        if let Some(permission_ids) = update.permission_ids {
            let permission_ids = dedup_ids(&permission_ids);
            ensure_permissions_exist(&txn, &permission_ids).await?;

            role_permissions::Entity::delete_many()
                .filter(role_permissions::Column::RoleId.eq(role_id))
                .exec(&txn)
                .await?;
            insert_grants(&txn, role_id, &permission_ids, actor_id).await?;
            details.insert("permission_ids".into(), json!(permission_ids));
        }

        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        txn.commit().await?;

        info!(role_id, "Updated role");
        self.audit.record(
            AuditEvent::new(actor_id, "role.update", "role")
                .with_resource_id(role_id)
                .with_details(serde_json::Value::Object(details)),
        );

        self.get_role(role_id).await
    }

    /// Atomically replace the permission set of a role
    pub async fn replace_permissions(
        &self,
        actor_id: i32,
        role_id: i32,
        permission_ids: Vec<i32>,
    ) -> RbacResult<RoleDetails> {
        self.update_role(
            actor_id,
            role_id,
            RoleUpdate {
                permission_ids: Some(permission_ids),
                ..Default::default()
            },
        )
        .await
    }

    /// Delete a role. System roles and roles with assigned users are refused.
    pub async fn delete_role(&self, actor_id: i32, role_id: i32) -> RbacResult<()> {
        let txn = self.store.begin().await?;

        let role = store::find_role(&txn, role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;

        if role.is_system {
            return Err(RbacError::SystemRoleProtected { name: role.name });
        }

        let user_count = store::count_role_users(&txn, role_id).await?;
        if user_count > 0 {
            return Err(RbacError::RoleInUse {
                role_id,
                user_count,
            });
        }

        menu_permissions::Entity::delete_many()
            .filter(menu_permissions::Column::RoleId.eq(role_id))
            .exec(&txn)
            .await?;
        role_permissions::Entity::delete_many()
            .filter(role_permissions::Column::RoleId.eq(role_id))
            .exec(&txn)
            .await?;
        roles::Entity::delete_by_id(role_id).exec(&txn).await?;

        txn.commit().await?;

        info!(role_id, name = %role.name, "Deleted role");
        self.audit.record(
            AuditEvent::new(actor_id, "role.delete", "role")
                .with_resource_id(role_id)
                .with_details(json!({ "name": role.name })),
        );

        Ok(())
    }

    /// Delete each role independently; one failure does not stop the rest
    pub async fn bulk_delete_roles(&self, actor_id: i32, role_ids: &[i32]) -> BulkResult {
        let mut result = BulkResult::default();

        for role_id in dedup_ids(role_ids) {
            match self.delete_role(actor_id, role_id).await {
                Ok(()) => result.record_success(role_id),
                Err(e) => {
                    debug!(role_id, "Bulk delete item failed: {}", e);
                    result.record_failure(role_id, e);
                }
            }
        }

        result
    }

    /// Create a new role from an existing one
    pub async fn clone_role(
        &self,
        actor_id: i32,
        source_role_id: i32,
        options: CloneRoleOptions,
    ) -> RbacResult<RoleDetails> {
        let name = self.validate_role_name(&options.name)?;
        let txn = self.store.begin().await?;

        let source = store::find_role(&txn, source_role_id)
            .await?
            .ok_or(RbacError::RoleNotFound {
                role_id: source_role_id,
            })?;

        if store::find_role_by_name(&txn, &name).await?.is_some() {
            return Err(RbacError::DuplicateRoleName { name });
        }

        let now = Utc::now();
        let role = roles::ActiveModel {
            name: Set(name),
            description: Set(normalize_text(options.description).or(source.description.clone())),
            is_system: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut copied_permissions = 0;
        if options.include_permissions {
            let permission_ids: Vec<i32> = role_permissions::Entity::find()
                .filter(role_permissions::Column::RoleId.eq(source_role_id))
                .order_by_asc(role_permissions::Column::PermissionId)
                .all(&txn)
                .await?
                .into_iter()
                .map(|grant| grant.permission_id)
                .collect();
            insert_grants(&txn, role.id, &permission_ids, actor_id).await?;
            copied_permissions = permission_ids.len();
        }

        let mut copied_menu_permissions = 0;
        if options.include_menu_permissions {
            let records = menu_permissions::Entity::find()
                .filter(menu_permissions::Column::RoleId.eq(source_role_id))
                .all(&txn)
                .await?;
            copied_menu_permissions = records.len();

            if !records.is_empty() {
                let copies = records.into_iter().map(|record| menu_permissions::ActiveModel {
                    menu_id: Set(record.menu_id),
                    role_id: Set(role.id),
                    can_view: Set(record.can_view),
                    can_edit: Set(record.can_edit),
                    can_delete: Set(record.can_delete),
                    can_export: Set(record.can_export),
                    granted_by: Set(Some(actor_id)),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                });
                menu_permissions::Entity::insert_many(copies).exec(&txn).await?;
            }
        }

        txn.commit().await?;

        info!(
            role_id = role.id,
            source_role_id, copied_permissions, copied_menu_permissions, "Cloned role"
        );
        self.audit.record(
            AuditEvent::new(actor_id, "role.clone", "role")
                .with_resource_id(role.id)
                .with_details(json!({
                    "source_role_id": source_role_id,
                    "name": role.name,
                    "copied_permissions": copied_permissions,
                    "copied_menu_permissions": copied_menu_permissions,
                })),
        );

        self.get_role(role.id).await
    }

    /// Assign users to a role, each independently. Already-assigned users
    /// count as successes.
    pub async fn assign_users(
        &self,
        actor_id: i32,
        role_id: i32,
        user_ids: &[i32],
    ) -> RbacResult<BulkResult> {
        let db = self.store.connection();
        store::find_role(db, role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;

        let mut result = BulkResult::default();
        for user_id in dedup_ids(user_ids) {
            match assign_user(db, role_id, user_id, actor_id).await {
                Ok(()) => result.record_success(user_id),
                Err(e) => result.record_failure(user_id, e),
            }
        }

        info!(
            role_id,
            assigned = result.success.len(),
            failed = result.failed.len(),
            "Assigned users to role"
        );
        self.audit.record(
            AuditEvent::new(actor_id, "role.assign_users", "role")
                .with_resource_id(role_id)
                .with_details(json!({
                    "success": result.success,
                    "failed": result.failed_ids(),
                })),
        );

        Ok(result)
    }

    /// Remove users from a role, each independently
    pub async fn remove_users(
        &self,
        actor_id: i32,
        role_id: i32,
        user_ids: &[i32],
    ) -> RbacResult<BulkResult> {
        let db = self.store.connection();
        store::find_role(db, role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;

        let mut result = BulkResult::default();
        for user_id in dedup_ids(user_ids) {
            let removed = user_roles::Entity::delete_many()
                .filter(user_roles::Column::UserId.eq(user_id))
                .filter(user_roles::Column::RoleId.eq(role_id))
                .exec(db)
                .await;

            match removed {
                Ok(res) if res.rows_affected > 0 => result.record_success(user_id),
                Ok(_) => result.record_failure(
                    user_id,
                    format!("User {} is not assigned to role {}", user_id, role_id),
                ),
                Err(e) => result.record_failure(user_id, RbacError::from(e)),
            }
        }

        info!(
            role_id,
            removed = result.success.len(),
            failed = result.failed.len(),
            "Removed users from role"
        );
        self.audit.record(
            AuditEvent::new(actor_id, "role.remove_users", "role")
                .with_resource_id(role_id)
                .with_details(json!({
                    "success": result.success,
                    "failed": result.failed_ids(),
                })),
        );

        Ok(result)
    }

    pub async fn get_role(&self, role_id: i32) -> RbacResult<RoleDetails> {
        let db = self.store.connection();
        let found = store::find_role_with_permissions(db, role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;
        let user_count = store::count_role_users(db, role_id).await?;

        Ok(RoleDetails {
            role: found.role,
            permissions: found.permissions,
            user_count,
        })
    }

    pub async fn find_role_by_name(&self, name: &str) -> RbacResult<Option<Role>> {
        Ok(store::find_role_by_name(self.store.connection(), name.trim()).await?)
    }

    /// All roles ordered by id, with their permissions and user counts
    pub async fn list_roles(&self) -> RbacResult<Vec<RoleDetails>> {
        let db = self.store.connection();
        let roles = roles::Entity::find()
            .order_by_asc(roles::Column::Id)
            .all(db)
            .await?;

        let role_ids: Vec<i32> = roles.iter().map(|r| r.id).collect();
        let mut permissions = store::find_permissions_for_roles(db, &role_ids).await?;

        let mut details = Vec::with_capacity(roles.len());
        for role in roles {
            let user_count = store::count_role_users(db, role.id).await?;
            details.push(RoleDetails {
                permissions: permissions.remove(&role.id).unwrap_or_default(),
                user_count,
                role,
            });
        }

        Ok(details)
    }

    /// Users currently holding a role, ordered by id
    pub async fn role_users(&self, role_id: i32) -> RbacResult<Vec<User>> {
        let db = self.store.connection();
        store::find_role(db, role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;

        let user_ids = store::find_user_ids_for_role(db, role_id).await?;
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        Ok(users::Entity::find()
            .filter(users::Column::Id.is_in(user_ids))
            .order_by_asc(users::Column::Id)
            .all(db)
            .await?)
    }
}

async fn assign_user<C: ConnectionTrait>(
    db: &C,
    role_id: i32,
    user_id: i32,
    actor_id: i32,
) -> RbacResult<()> {
    store::find_user(db, user_id)
        .await?
        .ok_or(RbacError::UserNotFound { user_id })?;

    let already = user_roles::Entity::find()
        .filter(user_roles::Column::UserId.eq(user_id))
        .filter(user_roles::Column::RoleId.eq(role_id))
        .one(db)
        .await?;
    if already.is_some() {
        return Ok(());
    }

    user_roles::ActiveModel {
        user_id: Set(user_id),
        role_id: Set(role_id),
        assigned_by: Set(Some(actor_id)),
        assigned_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(())
}

/// Fail with every unresolvable id when any permission id is unknown
pub(crate) async fn ensure_permissions_exist<C: ConnectionTrait>(
    db: &C,
    permission_ids: &[i32],
) -> RbacResult<()> {
    let existing = store::existing_permission_ids(db, permission_ids).await?;
    let missing: Vec<i32> = permission_ids
        .iter()
        .copied()
        .filter(|id| !existing.contains(id))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RbacError::UnknownPermissions {
            permission_ids: missing,
        })
    }
}

pub(crate) async fn insert_grants<C: ConnectionTrait>(
    db: &C,
    role_id: i32,
    permission_ids: &[i32],
    actor_id: i32,
) -> RbacResult<()> {
    if permission_ids.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    let grants = permission_ids
        .iter()
        .map(|&permission_id| role_permissions::ActiveModel {
            role_id: Set(role_id),
            permission_id: Set(permission_id),
            granted_by: Set(Some(actor_id)),
            granted_at: Set(now),
            ..Default::default()
        });

    role_permissions::Entity::insert_many(grants)
        .exec(db)
        .await?;

    Ok(())
}
