//! Idempotent seeding of configured permissions and system roles

use std::collections::HashMap;

use chrono::Utc;
use gatehouse_config::RbacConfig;
use gatehouse_storage::entities::{permissions, roles};
use gatehouse_storage::sea_orm::{ActiveModelTrait, Set};
use gatehouse_storage::{store, EntityStore};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{RbacError, RbacResult};
use crate::models::{normalize_text, PermissionName, SYSTEM_ACTOR};
use crate::roles::insert_grants;

/// What a seeding run changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub permissions_created: Vec<String>,
    pub roles_created: Vec<String>,
    /// `role:permission` pairs attached during this run
    pub grants_added: Vec<String>,
}

impl SeedReport {
    pub fn is_noop(&self) -> bool {
        self.permissions_created.is_empty()
            && self.roles_created.is_empty()
            && self.grants_added.is_empty()
    }
}

/// Create missing seed permissions and system roles, and attach any missing
/// configured permissions to those roles. Existing rows are left alone, so a
/// second run reports nothing.
pub async fn seed(store: &EntityStore, config: &RbacConfig) -> RbacResult<SeedReport> {
    let mut report = SeedReport::default();
    let txn = store.begin().await?;

    let mut names: Vec<PermissionName> = Vec::new();
    for raw in config
        .seed_permissions
        .iter()
        .chain(config.system_roles.iter().flat_map(|r| r.permissions.iter()))
    {
        let name = PermissionName::parse(raw.trim())?;
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let mut ids: HashMap<String, i32> = HashMap::new();
    for name in &names {
        let canonical = name.to_string();
        let id = match store::find_permission_by_name(&txn, &canonical).await? {
            Some(existing) => existing.id,
            None => {
                let now = Utc::now();
                let created = permissions::ActiveModel {
                    name: Set(canonical.clone()),
                    resource: Set(name.resource.clone()),
                    action: Set(name.action.clone()),
                    description: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                debug!(permission = %canonical, "Seeded permission");
                report.permissions_created.push(canonical.clone());
                created.id
            }
        };
        ids.insert(canonical, id);
    }

    for system_role in &config.system_roles {
        let role_name = system_role.name.trim();
        let role = match store::find_role_by_name(&txn, role_name).await? {
            Some(existing) => existing,
            None => {
                let now = Utc::now();
                let created = roles::ActiveModel {
                    name: Set(role_name.to_string()),
                    description: Set(normalize_text(system_role.description.clone())),
                    is_system: Set(true),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                debug!(role = role_name, "Seeded system role");
                report.roles_created.push(role_name.to_string());
                created
            }
        };

        let held = store::find_permissions_for_roles(&txn, &[role.id])
            .await?
            .remove(&role.id)
            .unwrap_or_default();

        let mut missing = Vec::new();
        for raw in &system_role.permissions {
            let canonical = PermissionName::parse(raw.trim())?.to_string();
            let permission_id = ids.get(&canonical).copied().ok_or_else(|| {
                RbacError::internal(format!("Seed permission '{}' was not created", canonical))
            })?;
            if !held.iter().any(|p| p.id == permission_id) && !missing.contains(&permission_id) {
                missing.push(permission_id);
                report.grants_added.push(format!("{}:{}", role.name, canonical));
            }
        }

        insert_grants(&txn, role.id, &missing, SYSTEM_ACTOR).await?;
    }

    txn.commit().await?;

    info!(
        permissions = report.permissions_created.len(),
        roles = report.roles_created.len(),
        grants = report.grants_added.len(),
        "Seeded authorization data"
    );

    Ok(report)
}
