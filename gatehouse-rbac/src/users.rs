//! User identity records and role assignment

use std::sync::Arc;

use chrono::Utc;
use gatehouse_storage::entities::{user_roles, users, Role, User};
use gatehouse_storage::sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use gatehouse_storage::{store, EntityStore};
use serde_json::json;
use tracing::info;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{RbacError, RbacResult};
use crate::models::{dedup_ids, normalize_text, NewUser, UserDetails};

#[derive(Clone)]
pub struct UserManager {
    store: EntityStore,
    audit: Arc<dyn AuditSink>,
}

impl UserManager {
    pub fn new(store: EntityStore, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn create_user(&self, actor_id: i32, new_user: NewUser) -> RbacResult<User> {
        let username = new_user.username.trim().to_string();
        if username.is_empty() {
            return Err(RbacError::validation("Username cannot be empty"));
        }

        let db = self.store.connection();
        if store::find_user_by_username(db, &username).await?.is_some() {
            return Err(RbacError::DuplicateUsername { username });
        }

        let now = Utc::now();
        let user = users::ActiveModel {
            username: Set(username),
            email: Set(normalize_text(new_user.email)),
            is_superuser: Set(new_user.is_superuser),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(user_id = user.id, username = %user.username, "Created user");
        self.audit.record(
            AuditEvent::new(actor_id, "user.create", "user")
                .with_resource_id(user.id)
                .with_details(json!({
                    "username": user.username,
                    "is_superuser": user.is_superuser,
                })),
        );

        Ok(user)
    }

    pub async fn set_superuser(
        &self,
        actor_id: i32,
        user_id: i32,
        is_superuser: bool,
    ) -> RbacResult<User> {
        let db = self.store.connection();
        let user = store::find_user(db, user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })?;

        let mut active: users::ActiveModel = user.into();
        active.is_superuser = Set(is_superuser);
        active.updated_at = Set(Utc::now());
        let user = active.update(db).await?;

        info!(user_id, is_superuser, "Updated superuser flag");
        self.audit.record(
            AuditEvent::new(actor_id, "user.update", "user")
                .with_resource_id(user_id)
                .with_details(json!({ "is_superuser": is_superuser })),
        );

        Ok(user)
    }

    pub async fn get_user(&self, user_id: i32) -> RbacResult<UserDetails> {
        let found = store::find_user_with_roles(self.store.connection(), user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })?;

        Ok(UserDetails {
            user: found.user,
            roles: found.roles,
        })
    }

    pub async fn find_by_username(&self, username: &str) -> RbacResult<Option<User>> {
        Ok(store::find_user_by_username(self.store.connection(), username.trim()).await?)
    }

    pub async fn list_users(&self) -> RbacResult<Vec<User>> {
        Ok(users::Entity::find()
            .order_by_asc(users::Column::Id)
            .all(self.store.connection())
            .await?)
    }

    /// Roles assigned to a user, ordered by id
    pub async fn user_roles(&self, user_id: i32) -> RbacResult<Vec<Role>> {
        Ok(self.get_user(user_id).await?.roles)
    }

    /// Replace the whole role set of a user. Every role id must exist or
    /// nothing changes.
    pub async fn replace_user_roles(
        &self,
        actor_id: i32,
        user_id: i32,
        role_ids: &[i32],
    ) -> RbacResult<UserDetails> {
        let role_ids = dedup_ids(role_ids);
        let txn = self.store.begin().await?;

        store::find_user(&txn, user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })?;

        let existing = store::existing_role_ids(&txn, &role_ids).await?;
        let missing: Vec<i32> = role_ids
            .iter()
            .copied()
            .filter(|id| !existing.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(RbacError::UnknownRoles { role_ids: missing });
        }

        let previous = store::find_role_ids_for_user(&txn, user_id).await?;

        user_roles::Entity::delete_many()
            .filter(user_roles::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        if !role_ids.is_empty() {
            let now = Utc::now();
            let assignments = role_ids.iter().map(|&role_id| user_roles::ActiveModel {
                user_id: Set(user_id),
                role_id: Set(role_id),
                assigned_by: Set(Some(actor_id)),
                assigned_at: Set(now),
                ..Default::default()
            });
            user_roles::Entity::insert_many(assignments).exec(&txn).await?;
        }

        txn.commit().await?;

        info!(user_id, roles = ?role_ids, "Replaced user roles");
        self.audit.record(
            AuditEvent::new(actor_id, "user.roles_replace", "user")
                .with_resource_id(user_id)
                .with_details(json!({ "previous_role_ids": previous, "role_ids": role_ids })),
        );

        self.get_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MockAuditSink;
    use crate::models::NewRole;
    use crate::roles::RoleManager;
    use gatehouse_storage::testing::TestDatabase;

    #[tokio::test]
    async fn test_replace_user_roles_atomic() {
        let db = TestDatabase::new_in_memory().await.unwrap();
        let mut audit = MockAuditSink::new();
        audit.expect_record().returning(|_| ());
        let audit: Arc<dyn AuditSink> = Arc::new(audit);
        let users = UserManager::new(db.store(), audit.clone());
        let roles = RoleManager::new(db.store(), audit);

        let user = users
            .create_user(
                1,
                NewUser {
                    username: "carol".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let a = roles
            .create_role(1, NewRole { name: "a".to_string(), ..Default::default() })
            .await
            .unwrap();
        let b = roles
            .create_role(1, NewRole { name: "b".to_string(), ..Default::default() })
            .await
            .unwrap();

        users
            .replace_user_roles(1, user.id, &[a.role.id])
            .await
            .unwrap();

        let failed = users.replace_user_roles(1, user.id, &[b.role.id, 777]).await;
        assert!(matches!(failed, Err(RbacError::UnknownRoles { .. })));
        let current: Vec<_> = users
            .user_roles(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(current, vec![a.role.id]);

        let replaced = users
            .replace_user_roles(1, user.id, &[b.role.id, a.role.id])
            .await
            .unwrap();
        assert_eq!(replaced.roles.len(), 2);

        let cleared = users.replace_user_roles(1, user.id, &[]).await.unwrap();
        assert!(cleared.roles.is_empty());
    }

    #[tokio::test]
    async fn test_create_user_rejects_duplicates() {
        let db = TestDatabase::new_in_memory().await.unwrap();
        let mut audit = MockAuditSink::new();
        audit.expect_record().times(2).returning(|_| ());
        let users = UserManager::new(db.store(), Arc::new(audit));

        let dave = users
            .create_user(
                1,
                NewUser {
                    username: "dave".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!dave.is_superuser);

        let duplicate = users
            .create_user(
                1,
                NewUser {
                    username: " dave ".to_string(),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(duplicate, Err(RbacError::DuplicateUsername { .. })));

        let promoted = users.set_superuser(1, dave.id, true).await.unwrap();
        assert!(promoted.is_superuser);
    }
}
