//! Entity store and read queries
//!
//! Every read helper is generic over [`ConnectionTrait`] so the same query runs
//! against the pool or inside an open [`DatabaseTransaction`].

use std::collections::{HashMap, HashSet};

use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection as SeaConnection, DatabaseTransaction, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::connection::DatabaseConnection;
use crate::entities::{
    menu_permissions, menus, permissions, role_permissions, roles, user_roles, users, Menu,
    MenuPermission, Permission, Role, User,
};

/// Shared handle to the RBAC tables
#[derive(Clone)]
pub struct EntityStore {
    database: DatabaseConnection,
}

impl EntityStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    /// Pooled Sea-ORM connection for reads outside a transaction
    pub fn connection(&self) -> &SeaConnection {
        self.database.get_connection()
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    /// Open a transaction. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<DatabaseTransaction, DbErr> {
        self.connection().begin().await
    }
}

/// A user together with every role assigned to it, roles ordered by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithRoles {
    pub user: User,
    pub roles: Vec<Role>,
}

/// A role together with its granted permissions, permissions ordered by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleWithPermissions {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

/// Menu selection criteria; `None` means unconstrained
#[derive(Debug, Clone, Default)]
pub struct MenuQuery {
    pub ids: Option<Vec<i32>>,
    /// Case-insensitive substring of the title
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

/// Menu permission selection criteria; `None` means unconstrained
#[derive(Debug, Clone, Default)]
pub struct MenuPermissionQuery {
    pub role_ids: Option<Vec<i32>>,
    pub menu_ids: Option<Vec<i32>>,
    pub can_view: Option<bool>,
}

pub async fn find_user<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<Option<User>, DbErr> {
    users::Entity::find_by_id(user_id).one(db).await
}

pub async fn find_user_by_username<C: ConnectionTrait>(
    db: &C,
    username: &str,
) -> Result<Option<User>, DbErr> {
    users::Entity::find()
        .filter(users::Column::Username.eq(username))
        .one(db)
        .await
}

pub async fn find_role<C: ConnectionTrait>(db: &C, role_id: i32) -> Result<Option<Role>, DbErr> {
    roles::Entity::find_by_id(role_id).one(db).await
}

pub async fn find_role_by_name<C: ConnectionTrait>(
    db: &C,
    name: &str,
) -> Result<Option<Role>, DbErr> {
    roles::Entity::find()
        .filter(roles::Column::Name.eq(name))
        .one(db)
        .await
}

pub async fn find_permission<C: ConnectionTrait>(
    db: &C,
    permission_id: i32,
) -> Result<Option<Permission>, DbErr> {
    permissions::Entity::find_by_id(permission_id).one(db).await
}

pub async fn find_permission_by_name<C: ConnectionTrait>(
    db: &C,
    name: &str,
) -> Result<Option<Permission>, DbErr> {
    permissions::Entity::find()
        .filter(permissions::Column::Name.eq(name))
        .one(db)
        .await
}

pub async fn find_menu<C: ConnectionTrait>(db: &C, menu_id: i32) -> Result<Option<Menu>, DbErr> {
    menus::Entity::find_by_id(menu_id).one(db).await
}

/// Role ids assigned to a user, ascending
pub async fn find_role_ids_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Vec<i32>, DbErr> {
    user_roles::Entity::find()
        .select_only()
        .column(user_roles::Column::RoleId)
        .filter(user_roles::Column::UserId.eq(user_id))
        .order_by_asc(user_roles::Column::RoleId)
        .into_tuple::<i32>()
        .all(db)
        .await
}

/// User ids holding a role, ascending
pub async fn find_user_ids_for_role<C: ConnectionTrait>(
    db: &C,
    role_id: i32,
) -> Result<Vec<i32>, DbErr> {
    user_roles::Entity::find()
        .select_only()
        .column(user_roles::Column::UserId)
        .filter(user_roles::Column::RoleId.eq(role_id))
        .order_by_asc(user_roles::Column::UserId)
        .into_tuple::<i32>()
        .all(db)
        .await
}

pub async fn find_user_with_roles<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Option<UserWithRoles>, DbErr> {
    let Some(user) = find_user(db, user_id).await? else {
        return Ok(None);
    };

    let role_ids = find_role_ids_for_user(db, user_id).await?;
    let roles = find_roles_by_ids(db, &role_ids).await?;

    Ok(Some(UserWithRoles { user, roles }))
}

/// Roles with the given ids, ascending by id. Unknown ids are skipped.
pub async fn find_roles_by_ids<C: ConnectionTrait>(
    db: &C,
    role_ids: &[i32],
) -> Result<Vec<Role>, DbErr> {
    if role_ids.is_empty() {
        return Ok(Vec::new());
    }

    roles::Entity::find()
        .filter(roles::Column::Id.is_in(role_ids.to_vec()))
        .order_by_asc(roles::Column::Id)
        .all(db)
        .await
}

pub async fn find_role_with_permissions<C: ConnectionTrait>(
    db: &C,
    role_id: i32,
) -> Result<Option<RoleWithPermissions>, DbErr> {
    let Some(role) = find_role(db, role_id).await? else {
        return Ok(None);
    };

    let mut grouped = find_permissions_for_roles(db, &[role_id]).await?;
    let permissions = grouped.remove(&role_id).unwrap_or_default();

    Ok(Some(RoleWithPermissions { role, permissions }))
}

/// Permissions granted to each of the given roles, each list ordered by name.
/// Roles with no grants are absent from the map.
pub async fn find_permissions_for_roles<C: ConnectionTrait>(
    db: &C,
    role_ids: &[i32],
) -> Result<HashMap<i32, Vec<Permission>>, DbErr> {
    if role_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let grants = role_permissions::Entity::find()
        .filter(role_permissions::Column::RoleId.is_in(role_ids.to_vec()))
        .all(db)
        .await?;

    if grants.is_empty() {
        return Ok(HashMap::new());
    }

    let permission_ids: HashSet<i32> = grants.iter().map(|g| g.permission_id).collect();
    let by_id: HashMap<i32, Permission> = permissions::Entity::find()
        .filter(permissions::Column::Id.is_in(permission_ids.into_iter().collect::<Vec<_>>()))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut grouped: HashMap<i32, Vec<Permission>> = HashMap::new();
    for grant in grants {
        if let Some(permission) = by_id.get(&grant.permission_id) {
            grouped
                .entry(grant.role_id)
                .or_default()
                .push(permission.clone());
        }
    }

    for list in grouped.values_mut() {
        list.sort_by(|a, b| a.name.cmp(&b.name));
    }

    Ok(grouped)
}

pub async fn find_permissions_by_names<C: ConnectionTrait>(
    db: &C,
    names: &[String],
) -> Result<Vec<Permission>, DbErr> {
    if names.is_empty() {
        return Ok(Vec::new());
    }

    permissions::Entity::find()
        .filter(permissions::Column::Name.is_in(names.to_vec()))
        .order_by_asc(permissions::Column::Name)
        .all(db)
        .await
}

/// Menus matching the query, ordered by `order_index` then id
pub async fn find_menus_by_filter<C: ConnectionTrait>(
    db: &C,
    query: &MenuQuery,
) -> Result<Vec<Menu>, DbErr> {
    let mut select = menus::Entity::find();

    if let Some(ids) = &query.ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        select = select.filter(menus::Column::Id.is_in(ids.clone()));
    }

    if let Some(is_active) = query.is_active {
        select = select.filter(menus::Column::IsActive.eq(is_active));
    }

    let mut menus = select
        .order_by_asc(menus::Column::OrderIndex)
        .order_by_asc(menus::Column::Id)
        .all(db)
        .await?;

    // SQLite LIKE is only ASCII case-insensitive, so match in memory
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let needle = search.to_lowercase();
        menus.retain(|m| m.title.to_lowercase().contains(&needle));
    }

    Ok(menus)
}

/// Direct children of a menu (or the roots when `parent_id` is `None`)
pub async fn find_menu_children<C: ConnectionTrait>(
    db: &C,
    parent_id: Option<i32>,
) -> Result<Vec<Menu>, DbErr> {
    let select = match parent_id {
        Some(id) => menus::Entity::find().filter(menus::Column::ParentId.eq(id)),
        None => menus::Entity::find().filter(menus::Column::ParentId.is_null()),
    };

    select
        .order_by_asc(menus::Column::OrderIndex)
        .order_by_asc(menus::Column::Id)
        .all(db)
        .await
}

pub async fn find_menu_permissions<C: ConnectionTrait>(
    db: &C,
    query: &MenuPermissionQuery,
) -> Result<Vec<MenuPermission>, DbErr> {
    let mut select = menu_permissions::Entity::find();

    if let Some(role_ids) = &query.role_ids {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        select = select.filter(menu_permissions::Column::RoleId.is_in(role_ids.clone()));
    }

    if let Some(menu_ids) = &query.menu_ids {
        if menu_ids.is_empty() {
            return Ok(Vec::new());
        }
        select = select.filter(menu_permissions::Column::MenuId.is_in(menu_ids.clone()));
    }

    if let Some(can_view) = query.can_view {
        select = select.filter(menu_permissions::Column::CanView.eq(can_view));
    }

    select
        .order_by_asc(menu_permissions::Column::MenuId)
        .order_by_asc(menu_permissions::Column::RoleId)
        .all(db)
        .await
}

pub async fn find_menu_permission<C: ConnectionTrait>(
    db: &C,
    menu_id: i32,
    role_id: i32,
) -> Result<Option<MenuPermission>, DbErr> {
    menu_permissions::Entity::find()
        .filter(menu_permissions::Column::MenuId.eq(menu_id))
        .filter(menu_permissions::Column::RoleId.eq(role_id))
        .one(db)
        .await
}

pub async fn count_role_users<C: ConnectionTrait>(db: &C, role_id: i32) -> Result<u64, DbErr> {
    user_roles::Entity::find()
        .filter(user_roles::Column::RoleId.eq(role_id))
        .count(db)
        .await
}

pub async fn count_permission_roles<C: ConnectionTrait>(
    db: &C,
    permission_id: i32,
) -> Result<u64, DbErr> {
    role_permissions::Entity::find()
        .filter(role_permissions::Column::PermissionId.eq(permission_id))
        .count(db)
        .await
}

pub async fn count_menu_children<C: ConnectionTrait>(db: &C, menu_id: i32) -> Result<u64, DbErr> {
    menus::Entity::find()
        .filter(menus::Column::ParentId.eq(menu_id))
        .count(db)
        .await
}

/// Subset of `ids` that exist in the users table
pub async fn existing_user_ids<C: ConnectionTrait>(
    db: &C,
    ids: &[i32],
) -> Result<HashSet<i32>, DbErr> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    let found = users::Entity::find()
        .select_only()
        .column(users::Column::Id)
        .filter(users::Column::Id.is_in(ids.to_vec()))
        .into_tuple::<i32>()
        .all(db)
        .await?;

    Ok(found.into_iter().collect())
}

/// Subset of `ids` that exist in the roles table
pub async fn existing_role_ids<C: ConnectionTrait>(
    db: &C,
    ids: &[i32],
) -> Result<HashSet<i32>, DbErr> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    let found = roles::Entity::find()
        .select_only()
        .column(roles::Column::Id)
        .filter(roles::Column::Id.is_in(ids.to_vec()))
        .into_tuple::<i32>()
        .all(db)
        .await?;

    Ok(found.into_iter().collect())
}

/// Subset of `ids` that exist in the permissions table
pub async fn existing_permission_ids<C: ConnectionTrait>(
    db: &C,
    ids: &[i32],
) -> Result<HashSet<i32>, DbErr> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    let found = permissions::Entity::find()
        .select_only()
        .column(permissions::Column::Id)
        .filter(permissions::Column::Id.is_in(ids.to_vec()))
        .into_tuple::<i32>()
        .all(db)
        .await?;

    Ok(found.into_iter().collect())
}
