//! Menu permission aggregation
//!
//! Visibility and capability flags are computed from committed rows on every
//! call. A user's flags on a menu are the OR of the flags of all of their
//! roles.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use gatehouse_storage::entities::{menu_permissions, roles, MenuPermission};
use gatehouse_storage::sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use gatehouse_storage::store::{self, MenuPermissionQuery};
use gatehouse_storage::EntityStore;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{RbacError, RbacResult};
use crate::menus::load_menu_index;
use crate::models::{
    BulkResult, Capability, CapabilityFlags, CapabilityUpdate, MatrixRole, MatrixRow,
    MenuAccessDecision, MenuFilter, MenuNode, MenuPermissionUpdate, MenuStatistics,
    PermissionMatrix, RoleRef,
};
use crate::tree::MenuIndex;

/// OR-merge the flags of every record per menu
fn aggregate_flags<'a>(
    records: impl IntoIterator<Item = &'a MenuPermission>,
) -> HashMap<i32, CapabilityFlags> {
    let mut flags: HashMap<i32, CapabilityFlags> = HashMap::new();
    for record in records {
        let entry = flags.entry(record.menu_id).or_default();
        *entry = entry.or(CapabilityFlags::from(record));
    }
    flags
}

#[derive(Clone)]
pub struct MenuPermissionService {
    store: EntityStore,
    audit: Arc<dyn AuditSink>,
}

impl MenuPermissionService {
    pub fn new(store: EntityStore, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Menus the user may view, with flags aggregated across their roles.
    ///
    /// A viewable menu whose ancestors are not all viewable is left out.
    pub async fn build_user_menu_tree(&self, user_id: i32) -> RbacResult<Vec<MenuNode>> {
        let db = self.store.connection();

        store::find_user(db, user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })?;

        let role_ids = store::find_role_ids_for_user(db, user_id).await?;
        debug!(user_id, roles = ?role_ids, "Building user menu tree");
        self.visible_forest(role_ids).await
    }

    /// Menus a single role may view, with that role's flags
    pub async fn build_role_menu_tree(&self, role_id: i32) -> RbacResult<Vec<MenuNode>> {
        store::find_role(self.store.connection(), role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;

        self.visible_forest(vec![role_id]).await
    }

    async fn visible_forest(&self, role_ids: Vec<i32>) -> RbacResult<Vec<MenuNode>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let db = self.store.connection();
        let records = store::find_menu_permissions(
            db,
            &MenuPermissionQuery {
                role_ids: Some(role_ids),
                can_view: Some(true),
                ..Default::default()
            },
        )
        .await?;
        let index = load_menu_index(db).await?;

        let flags = aggregate_flags(records.iter().filter(|record| {
            index
                .get(record.menu_id)
                .map(|menu| menu.is_active)
                .unwrap_or(false)
        }));
        let members: HashSet<i32> = flags.keys().copied().collect();

        Ok(index.build_forest(&members, false, &flags))
    }

    /// Every menu matching `filter`, without permission data.
    ///
    /// A match whose parent does not match is shown at the top level.
    pub async fn build_complete_menu_tree(&self, filter: &MenuFilter) -> RbacResult<Vec<MenuNode>> {
        let index = load_menu_index(self.store.connection()).await?;

        let scope: Option<HashSet<i32>> = match filter.parent_id {
            Some(parent_id) if !index.contains(parent_id) => {
                return Err(RbacError::MenuNotFound { menu_id: parent_id });
            }
            Some(parent_id) => Some(index.descendants(parent_id).into_iter().collect()),
            None => None,
        };

        let needle = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let members: HashSet<i32> = index
            .preorder()
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| scope.as_ref().map_or(true, |scope| scope.contains(id)))
            .filter_map(|id| index.get(id))
            .filter(|menu| filter.is_active.map_or(true, |active| menu.is_active == active))
            .filter(|menu| {
                needle.as_deref().map_or(true, |needle| {
                    menu.title.to_lowercase().contains(needle)
                        || menu
                            .path
                            .as_deref()
                            .is_some_and(|path| path.to_lowercase().contains(needle))
                })
            })
            .map(|menu| menu.id)
            .collect();

        Ok(index.build_forest(&members, true, &HashMap::new()))
    }

    /// Grant records of one role, ordered by menu id
    pub async fn role_menu_permissions(&self, role_id: i32) -> RbacResult<Vec<MenuPermission>> {
        let db = self.store.connection();
        store::find_role(db, role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;

        Ok(store::find_menu_permissions(
            db,
            &MenuPermissionQuery {
                role_ids: Some(vec![role_id]),
                ..Default::default()
            },
        )
        .await?)
    }

    /// Merge the requested flags into the role's grants.
    ///
    /// With `apply_to_children` each item also covers every descendant of its
    /// menu. A menu covered more than once is written once, with the flags of
    /// the nearest requested menu among itself and its ancestors, so an item's
    /// own menu always receives that item's flags. Each menu succeeds or fails
    /// on its own; a merge that leaves every flag false removes the grant.
    pub async fn update_role_menu_permissions(
        &self,
        actor_id: i32,
        role_id: i32,
        updates: &[MenuPermissionUpdate],
        apply_to_children: bool,
    ) -> RbacResult<BulkResult> {
        let db = self.store.connection();
        store::find_role(db, role_id)
            .await?
            .ok_or(RbacError::RoleNotFound { role_id })?;

        let index = load_menu_index(db).await?;
        let mut result = BulkResult::default();
        let mut seen = HashSet::new();
        let mut targets: Vec<(i32, CapabilityUpdate)> = Vec::new();

        // Repeated items for the same menu keep the first
        let mut requested: HashMap<i32, CapabilityUpdate> = HashMap::new();
        for update in updates {
            if index.contains(update.menu_id) {
                requested.entry(update.menu_id).or_insert(update.flags);
            }
        }

        let nearest_request = |menu_id: i32| -> Option<CapabilityUpdate> {
            let mut current = Some(menu_id);
            while let Some(id) = current {
                if let Some(flags) = requested.get(&id) {
                    return Some(*flags);
                }
                current = index.get(id).and_then(|menu| menu.parent_id);
            }
            None
        };

        for update in updates {
            if !index.contains(update.menu_id) {
                if seen.insert(update.menu_id) {
                    result.record_failure(
                        update.menu_id,
                        RbacError::MenuNotFound {
                            menu_id: update.menu_id,
                        },
                    );
                }
                continue;
            }

            let covered = if apply_to_children {
                index.with_descendants(update.menu_id)
            } else {
                vec![update.menu_id]
            };

            for menu_id in covered {
                if seen.insert(menu_id) {
                    let flags = nearest_request(menu_id).unwrap_or(update.flags);
                    targets.push((menu_id, flags));
                }
            }
        }

        for (menu_id, flags) in targets {
            match self.apply_grant(actor_id, role_id, menu_id, flags).await {
                Ok(_) => result.record_success(menu_id),
                Err(e) => {
                    warn!(role_id, menu_id, "Failed to update menu permission: {}", e);
                    result.record_failure(menu_id, e);
                }
            }
        }

        info!(
            role_id,
            succeeded = result.success.len(),
            failed = result.failed.len(),
            "Updated role menu permissions"
        );
        self.audit.record(
            AuditEvent::new(actor_id, "menu_permission.batch_update", "role")
                .with_resource_id(role_id)
                .with_details(json!({
                    "apply_to_children": apply_to_children,
                    "updates": updates,
                    "success": result.success,
                    "failed": result.failed_ids(),
                })),
        );

        Ok(result)
    }

    /// Write one merged grant. Returns the stored flags, `None` when the
    /// grant was removed or never existed.
    async fn apply_grant(
        &self,
        actor_id: i32,
        role_id: i32,
        menu_id: i32,
        update: CapabilityUpdate,
    ) -> RbacResult<Option<CapabilityFlags>> {
        let db = self.store.connection();
        let existing = store::find_menu_permission(db, menu_id, role_id).await?;

        let base = existing.as_ref().map(CapabilityFlags::from).unwrap_or_default();
        let merged = update.apply_to(base);

        match existing {
            Some(record) if !merged.any() => {
                menu_permissions::Entity::delete_by_id(record.id)
                    .exec(db)
                    .await?;
                debug!(role_id, menu_id, "Removed menu grant");
                Ok(None)
            }
            None if !merged.any() => Ok(None),
            Some(record) => {
                let mut active: menu_permissions::ActiveModel = record.into();
                active.can_view = Set(merged.can_view);
                active.can_edit = Set(merged.can_edit);
                active.can_delete = Set(merged.can_delete);
                active.can_export = Set(merged.can_export);
                active.granted_by = Set(Some(actor_id));
                active.updated_at = Set(Utc::now());
                active.update(db).await?;
                Ok(Some(merged))
            }
            None => {
                let now = Utc::now();
                menu_permissions::ActiveModel {
                    menu_id: Set(menu_id),
                    role_id: Set(role_id),
                    can_view: Set(merged.can_view),
                    can_edit: Set(merged.can_edit),
                    can_delete: Set(merged.can_delete),
                    can_export: Set(merged.can_export),
                    granted_by: Set(Some(actor_id)),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(db)
                .await?;
                Ok(Some(merged))
            }
        }
    }

    /// Whether any of the user's roles grants `capability` on an active menu
    pub async fn check_menu_access(
        &self,
        user_id: i32,
        menu_id: i32,
        capability: Capability,
    ) -> RbacResult<MenuAccessDecision> {
        let db = self.store.connection();

        store::find_user(db, user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })?;

        let role_ids = store::find_role_ids_for_user(db, user_id).await?;
        if role_ids.is_empty() {
            return Ok(MenuAccessDecision::denied("User has no roles"));
        }

        let Some(menu) = store::find_menu(db, menu_id).await? else {
            return Ok(MenuAccessDecision::denied(format!(
                "Menu {} does not exist",
                menu_id
            )));
        };
        if !menu.is_active {
            return Ok(MenuAccessDecision::denied(format!(
                "Menu '{}' is inactive",
                menu.title
            )));
        }

        let records = store::find_menu_permissions(
            db,
            &MenuPermissionQuery {
                role_ids: Some(role_ids),
                menu_ids: Some(vec![menu_id]),
                ..Default::default()
            },
        )
        .await?;

        let granting: Vec<i32> = records
            .iter()
            .filter(|record| CapabilityFlags::from(*record).has(capability))
            .map(|record| record.role_id)
            .collect();

        if granting.is_empty() {
            return Ok(MenuAccessDecision::denied(format!(
                "No role grants {} on menu '{}'",
                capability, menu.title
            )));
        }

        let roles = store::find_roles_by_ids(db, &granting).await?;
        Ok(MenuAccessDecision::allowed(
            roles
                .into_iter()
                .map(|role| RoleRef {
                    id: role.id,
                    name: role.name,
                })
                .collect(),
        ))
    }

    /// Role x menu capability grid, menus in tree pre-order
    pub async fn permission_matrix(&self) -> RbacResult<PermissionMatrix> {
        let db = self.store.connection();

        let roles = roles::Entity::find()
            .order_by_asc(roles::Column::Id)
            .all(db)
            .await?;
        let index = load_menu_index(db).await?;
        let records =
            store::find_menu_permissions(db, &MenuPermissionQuery::default()).await?;

        let mut cells: HashMap<i32, BTreeMap<i32, CapabilityFlags>> = HashMap::new();
        for record in &records {
            cells
                .entry(record.menu_id)
                .or_default()
                .insert(record.role_id, CapabilityFlags::from(record));
        }

        let rows = index
            .preorder()
            .into_iter()
            .filter_map(|(menu_id, depth)| {
                let menu = index.get(menu_id)?;
                Some(MatrixRow {
                    menu_id,
                    parent_id: menu.parent_id,
                    title: menu.title.clone(),
                    depth,
                    is_active: menu.is_active,
                    cells: cells.remove(&menu_id).unwrap_or_default(),
                })
            })
            .collect();

        Ok(PermissionMatrix {
            roles: roles
                .into_iter()
                .map(|role| MatrixRole {
                    id: role.id,
                    name: role.name,
                    is_system: role.is_system,
                })
                .collect(),
            rows,
        })
    }

    pub async fn menu_statistics(&self) -> RbacResult<MenuStatistics> {
        let index: MenuIndex = load_menu_index(self.store.connection()).await?;
        Ok(index.statistics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MockAuditSink;
    use crate::menus::MenuTreeManager;
    use crate::models::{MenuUpdate, NewMenu, NewRole, NewUser};
    use crate::roles::RoleManager;
    use crate::users::UserManager;
    use gatehouse_storage::entities::Menu;
    use gatehouse_storage::testing::TestDatabase;

    struct Fixture {
        _db: TestDatabase,
        menus: MenuTreeManager,
        roles: RoleManager,
        users: UserManager,
        access: MenuPermissionService,
    }

    async fn fixture() -> Fixture {
        let db = TestDatabase::new_in_memory().await.unwrap();
        let mut audit = MockAuditSink::new();
        audit.expect_record().returning(|_| ());
        let audit: Arc<dyn AuditSink> = Arc::new(audit);

        Fixture {
            menus: MenuTreeManager::new(db.store(), audit.clone()),
            roles: RoleManager::new(db.store(), audit.clone()),
            users: UserManager::new(db.store(), audit.clone()),
            access: MenuPermissionService::new(db.store(), audit),
            _db: db,
        }
    }

    impl Fixture {
        async fn role(&self, name: &str) -> i32 {
            self.roles
                .create_role(
                    1,
                    NewRole {
                        name: name.to_string(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
                .role
                .id
        }

        async fn user_with(&self, username: &str, role_ids: &[i32]) -> i32 {
            let user = self
                .users
                .create_user(
                    1,
                    NewUser {
                        username: username.to_string(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            self.users
                .replace_user_roles(1, user.id, role_ids)
                .await
                .unwrap();
            user.id
        }

        async fn chain(&self) -> (Menu, Menu, Menu) {
            let m1 = self.menus.create_menu(1, NewMenu::new("M1")).await.unwrap();
            let m2 = self
                .menus
                .create_menu(1, NewMenu::new("M2").under(m1.id))
                .await
                .unwrap();
            let m3 = self
                .menus
                .create_menu(1, NewMenu::new("M3").under(m2.id))
                .await
                .unwrap();
            (m1, m2, m3)
        }

        async fn grant(&self, role_id: i32, menu_id: i32, flags: CapabilityFlags) {
            let result = self
                .access
                .update_role_menu_permissions(
                    1,
                    role_id,
                    &[MenuPermissionUpdate {
                        menu_id,
                        flags: CapabilityUpdate::exact(flags),
                    }],
                    false,
                )
                .await
                .unwrap();
            assert!(result.all_succeeded());
        }
    }

    #[tokio::test]
    async fn test_user_tree_aggregates_flags() {
        let f = fixture().await;
        let m1 = f.menus.create_menu(1, NewMenu::new("Reports")).await.unwrap();
        let a = f.role("analyst").await;
        let b = f.role("editor").await;
        let user = f.user_with("erin", &[a, b]).await;

        f.grant(a, m1.id, CapabilityFlags::view_only()).await;
        f.grant(
            b,
            m1.id,
            CapabilityFlags {
                can_view: true,
                can_edit: true,
                ..Default::default()
            },
        )
        .await;

        let tree = f.access.build_user_menu_tree(user).await.unwrap();
        assert_eq!(tree.len(), 1);
        let flags = tree[0].permissions.unwrap();
        assert!(flags.can_view && flags.can_edit);
        assert!(!flags.can_delete && !flags.can_export);
    }

    #[tokio::test]
    async fn test_user_tree_requires_visible_path() {
        let f = fixture().await;
        let (m1, m2, m3) = f.chain().await;
        let role = f.role("viewer").await;
        let user = f.user_with("frank", &[role]).await;

        f.grant(role, m1.id, CapabilityFlags::view_only()).await;
        f.grant(role, m3.id, CapabilityFlags::view_only()).await;

        let tree = f.access.build_user_menu_tree(user).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, m1.id);
        assert!(tree[0].find(m3.id).is_none());

        f.grant(role, m2.id, CapabilityFlags::view_only()).await;
        f.menus
            .update_menu(
                1,
                m2.id,
                MenuUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let tree = f.access.build_user_menu_tree(user).await.unwrap();
        assert_eq!(tree[0].size(), 1);
    }

    #[tokio::test]
    async fn test_cascade_and_all_false_collapse() {
        let f = fixture().await;
        let (m1, m2, m3) = f.chain().await;
        let role = f.role("ops").await;

        let result = f
            .access
            .update_role_menu_permissions(
                1,
                role,
                &[
                    MenuPermissionUpdate {
                        menu_id: m1.id,
                        flags: CapabilityUpdate {
                            can_view: Some(true),
                            ..Default::default()
                        },
                    },
                    MenuPermissionUpdate {
                        menu_id: m2.id,
                        flags: CapabilityUpdate::exact(CapabilityFlags::all()),
                    },
                    MenuPermissionUpdate {
                        menu_id: 999,
                        flags: CapabilityUpdate::default(),
                    },
                ],
                true,
            )
            .await
            .unwrap();

        assert_eq!(result.success, vec![m1.id, m2.id, m3.id]);
        assert_eq!(result.failed_ids(), vec![999]);
        assert!(result.is_partial());

        // m2 was requested itself, so it and its subtree take its flags
        let grants = f.access.role_menu_permissions(role).await.unwrap();
        let flags: Vec<CapabilityFlags> = grants.iter().map(CapabilityFlags::from).collect();
        assert_eq!(
            flags,
            vec![
                CapabilityFlags::view_only(),
                CapabilityFlags::all(),
                CapabilityFlags::all()
            ]
        );

        let result = f
            .access
            .update_role_menu_permissions(
                1,
                role,
                &[MenuPermissionUpdate {
                    menu_id: m2.id,
                    flags: CapabilityUpdate::exact(CapabilityFlags::default()),
                }],
                false,
            )
            .await
            .unwrap();
        assert!(result.all_succeeded());

        let remaining: Vec<i32> = f
            .access
            .role_menu_permissions(role)
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.menu_id)
            .collect();
        assert_eq!(remaining, vec![m1.id, m3.id]);
    }

    #[tokio::test]
    async fn test_check_menu_access_reasons() {
        let f = fixture().await;
        let (m1, m2, _) = f.chain().await;
        let a = f.role("alpha").await;
        let b = f.role("beta").await;
        let lonely = f.user_with("gina", &[]).await;
        let user = f.user_with("hank", &[a, b]).await;

        f.grant(a, m1.id, CapabilityFlags::all()).await;
        f.grant(b, m1.id, CapabilityFlags::all()).await;
        f.grant(a, m2.id, CapabilityFlags::view_only()).await;

        let decision = f
            .access
            .check_menu_access(user, m1.id, Capability::Export)
            .await
            .unwrap();
        assert!(decision.allowed);
        let names: Vec<_> = decision.granting_roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        let decision = f
            .access
            .check_menu_access(user, m2.id, Capability::Edit)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.is_some());

        let decision = f
            .access
            .check_menu_access(lonely, m1.id, Capability::View)
            .await
            .unwrap();
        assert_eq!(decision.reason.as_deref(), Some("User has no roles"));

        let decision = f
            .access
            .check_menu_access(user, 4040, Capability::View)
            .await
            .unwrap();
        assert!(!decision.allowed);

        assert!(matches!(
            f.access.check_menu_access(9999, m1.id, Capability::View).await,
            Err(RbacError::UserNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_complete_tree_filter_promotes_matches() {
        let f = fixture().await;
        let (m1, m2, m3) = f.chain().await;
        let other = f.menus.create_menu(1, NewMenu::new("Other M")).await.unwrap();

        let all = f
            .access
            .build_complete_menu_tree(&MenuFilter::default())
            .await
            .unwrap();
        assert_eq!(all.iter().map(MenuNode::size).sum::<usize>(), 4);
        assert!(all.iter().all(|n| n.permissions.is_none()));

        let scoped = f
            .access
            .build_complete_menu_tree(&MenuFilter {
                parent_id: Some(m1.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, m2.id);
        assert_eq!(scoped[0].children[0].id, m3.id);

        let searched = f
            .access
            .build_complete_menu_tree(&MenuFilter {
                search: Some("m3".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].id, m3.id);
        assert!(searched.iter().all(|n| n.id != other.id));
    }

    #[tokio::test]
    async fn test_matrix_and_statistics() {
        let f = fixture().await;
        let (m1, m2, m3) = f.chain().await;
        let side = f.menus.create_menu(1, NewMenu::new("Side")).await.unwrap();
        let role = f.role("auditor").await;
        f.grant(role, m2.id, CapabilityFlags::view_only()).await;

        let matrix = f.access.permission_matrix().await.unwrap();
        let order: Vec<(i32, usize)> = matrix.rows.iter().map(|r| (r.menu_id, r.depth)).collect();
        assert_eq!(order, vec![(m1.id, 0), (m2.id, 1), (m3.id, 2), (side.id, 0)]);
        assert_eq!(matrix.cell(m2.id, role), Some(CapabilityFlags::view_only()));
        assert_eq!(matrix.cell(m1.id, role), None);

        let stats = f.access.menu_statistics().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.root_count, 2);
        assert_eq!(stats.max_depth, 3);
        assert_eq!(stats.leaf_count, 2);
        assert!((stats.average_branching_factor - 1.0).abs() < f64::EPSILON);
    }
}
