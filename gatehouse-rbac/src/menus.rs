//! Menu tree manager
//!
//! Structural checks work on a [`MenuIndex`] snapshot loaded inside the same
//! transaction as the write they guard.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use gatehouse_storage::entities::{menu_permissions, menus, Menu};
use gatehouse_storage::sea_orm::sea_query::Expr;
use gatehouse_storage::sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use gatehouse_storage::store::{self, MenuQuery};
use gatehouse_storage::EntityStore;
use serde_json::json;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{RbacError, RbacResult};
use crate::models::{normalize_text, MenuOrder, MenuUpdate, NewMenu};
use crate::tree::MenuIndex;

/// Load every menu into an index
pub(crate) async fn load_menu_index<C: ConnectionTrait>(db: &C) -> RbacResult<MenuIndex> {
    let all = store::find_menus_by_filter(db, &MenuQuery::default()).await?;
    Ok(MenuIndex::new(all))
}

fn validate_title(title: &str) -> RbacResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(RbacError::validation("Menu title cannot be empty"));
    }
    Ok(title.to_string())
}

#[derive(Clone)]
pub struct MenuTreeManager {
    store: EntityStore,
    audit: Arc<dyn AuditSink>,
}

impl MenuTreeManager {
    pub fn new(store: EntityStore, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn get_menu(&self, menu_id: i32) -> RbacResult<Menu> {
        store::find_menu(self.store.connection(), menu_id)
            .await?
            .ok_or(RbacError::MenuNotFound { menu_id })
    }

    /// Ordered direct children; `None` lists the roots
    pub async fn list_children(&self, parent_id: Option<i32>) -> RbacResult<Vec<Menu>> {
        Ok(store::find_menu_children(self.store.connection(), parent_id).await?)
    }

    pub async fn create_menu(&self, actor_id: i32, new_menu: NewMenu) -> RbacResult<Menu> {
        let title = validate_title(&new_menu.title)?;
        let txn = self.store.begin().await?;

        let index = load_menu_index(&txn).await?;
        if let Some(parent_id) = new_menu.parent_id {
            if !index.contains(parent_id) {
                return Err(RbacError::MenuNotFound { menu_id: parent_id });
            }
        }

        let order_index = new_menu
            .order_index
            .unwrap_or_else(|| index.next_order_index(new_menu.parent_id, None));

        let now = Utc::now();
        let menu = menus::ActiveModel {
            parent_id: Set(new_menu.parent_id),
            title: Set(title),
            path: Set(normalize_text(new_menu.path)),
            icon: Set(normalize_text(new_menu.icon)),
            order_index: Set(order_index),
            is_active: Set(new_menu.is_active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(menu_id = menu.id, parent_id = ?menu.parent_id, "Created menu");
        self.audit.record(
            AuditEvent::new(actor_id, "menu.create", "menu")
                .with_resource_id(menu.id)
                .with_details(json!({ "title": menu.title, "parent_id": menu.parent_id })),
        );

        Ok(menu)
    }

    /// Apply field changes. A parent change is validated like a move and,
    /// without an explicit order, appends the menu to its new siblings.
    pub async fn update_menu(
        &self,
        actor_id: i32,
        menu_id: i32,
        update: MenuUpdate,
    ) -> RbacResult<Menu> {
        let txn = self.store.begin().await?;
        let index = load_menu_index(&txn).await?;

        let existing = index
            .get(menu_id)
            .cloned()
            .ok_or(RbacError::MenuNotFound { menu_id })?;
        let previous_parent = existing.parent_id;
        let mut active: menus::ActiveModel = existing.into();

        if let Some(title) = update.title.as_deref() {
            active.title = Set(validate_title(title)?);
        }
        if let Some(path) = update.path.clone() {
            active.path = Set(normalize_text(path));
        }
        if let Some(icon) = update.icon.clone() {
            active.icon = Set(normalize_text(icon));
        }
        if let Some(is_active) = update.is_active {
            active.is_active = Set(is_active);
        }

        let reparented = match update.parent_id {
            Some(new_parent) if new_parent != previous_parent => {
                index.check_move(menu_id, new_parent)?;
                active.parent_id = Set(new_parent);
                if update.order_index.is_none() {
                    active.order_index = Set(index.next_order_index(new_parent, Some(menu_id)));
                }
                true
            }
            _ => false,
        };
        if let Some(order_index) = update.order_index {
            active.order_index = Set(order_index);
        }

        active.updated_at = Set(Utc::now());
        let menu = active.update(&txn).await?;
        txn.commit().await?;

        info!(menu_id, reparented, "Updated menu");
        self.audit.record(
            AuditEvent::new(actor_id, "menu.update", "menu")
                .with_resource_id(menu_id)
                .with_details(json!({
                    "title": menu.title,
                    "is_active": menu.is_active,
                    "previous_parent_id": previous_parent,
                    "parent_id": menu.parent_id,
                })),
        );

        Ok(menu)
    }

    /// Reparent `menu_id` under `new_parent` (`None` makes it a root).
    ///
    /// Fails with `CircularMenuReference` when the new parent is the menu
    /// itself or any of its descendants.
    pub async fn move_menu(
        &self,
        actor_id: i32,
        menu_id: i32,
        new_parent: Option<i32>,
        order_index: Option<i32>,
    ) -> RbacResult<Menu> {
        let txn = self.store.begin().await?;
        let index = load_menu_index(&txn).await?;
        index.check_move(menu_id, new_parent)?;

        let existing = index
            .get(menu_id)
            .cloned()
            .ok_or(RbacError::MenuNotFound { menu_id })?;
        let previous_parent = existing.parent_id;

        let order_index = match order_index {
            Some(order_index) => order_index,
            None if previous_parent == new_parent => existing.order_index,
            None => index.next_order_index(new_parent, Some(menu_id)),
        };

        let mut active: menus::ActiveModel = existing.into();
        active.parent_id = Set(new_parent);
        active.order_index = Set(order_index);
        active.updated_at = Set(Utc::now());
        let menu = active.update(&txn).await?;
        txn.commit().await?;

        info!(menu_id, from = ?previous_parent, to = ?new_parent, "Moved menu");
        self.audit.record(
            AuditEvent::new(actor_id, "menu.move", "menu")
                .with_resource_id(menu_id)
                .with_details(json!({
                    "previous_parent_id": previous_parent,
                    "parent_id": new_parent,
                    "order_index": order_index,
                })),
        );

        Ok(menu)
    }

    /// Set sibling positions in one transaction. Every referenced menu must
    /// exist or nothing is written.
    pub async fn reorder_menus(
        &self,
        actor_id: i32,
        orders: &[MenuOrder],
    ) -> RbacResult<Vec<Menu>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = orders.iter().find(|o| !seen.insert(o.menu_id)) {
            return Err(RbacError::validation(format!(
                "Menu {} appears more than once in the reorder batch",
                duplicate.menu_id
            )));
        }

        let ids: Vec<i32> = orders.iter().map(|o| o.menu_id).collect();
        let txn = self.store.begin().await?;

        let found = store::find_menus_by_filter(
            &txn,
            &MenuQuery {
                ids: Some(ids.clone()),
                ..Default::default()
            },
        )
        .await?;
        let found_ids: HashSet<i32> = found.iter().map(|m| m.id).collect();
        let missing: Vec<i32> = ids
            .iter()
            .copied()
            .filter(|id| !found_ids.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(RbacError::MenusNotFound { menu_ids: missing });
        }

        let now = Utc::now();
        for order in orders {
            menus::Entity::update_many()
                .col_expr(menus::Column::OrderIndex, Expr::value(order.order_index))
                .col_expr(menus::Column::UpdatedAt, Expr::value(now))
                .filter(menus::Column::Id.eq(order.menu_id))
                .exec(&txn)
                .await?;
            debug!(menu_id = order.menu_id, order_index = order.order_index, "Reordered menu");
        }

        let updated = store::find_menus_by_filter(
            &txn,
            &MenuQuery {
                ids: Some(ids),
                ..Default::default()
            },
        )
        .await?;

        txn.commit().await?;

        info!(count = orders.len(), "Reordered menus");
        self.audit.record(
            AuditEvent::new(actor_id, "menu.reorder", "menu")
                .with_details(json!({ "orders": orders })),
        );

        Ok(updated)
    }

    /// Delete a childless menu together with its capability records
    pub async fn delete_menu(&self, actor_id: i32, menu_id: i32) -> RbacResult<()> {
        let txn = self.store.begin().await?;

        let menu = store::find_menu(&txn, menu_id)
            .await?
            .ok_or(RbacError::MenuNotFound { menu_id })?;

        let child_count = store::count_menu_children(&txn, menu_id).await?;
        if child_count > 0 {
            return Err(RbacError::MenuHasChildren {
                menu_id,
                child_count,
            });
        }

        let grants = menu_permissions::Entity::delete_many()
            .filter(menu_permissions::Column::MenuId.eq(menu_id))
            .exec(&txn)
            .await?;
        menus::Entity::delete_by_id(menu_id).exec(&txn).await?;
        txn.commit().await?;

        info!(menu_id, removed_grants = grants.rows_affected, "Deleted menu");
        self.audit.record(
            AuditEvent::new(actor_id, "menu.delete", "menu")
                .with_resource_id(menu_id)
                .with_details(json!({
                    "title": menu.title,
                    "removed_grants": grants.rows_affected,
                })),
        );

        Ok(())
    }
}
