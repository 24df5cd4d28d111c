use super::m20250301_000001_create_rbac_tables::{Permissions, RolePermissions, UserRoles};
use super::m20250301_000002_create_menu_tables::{MenuPermissions, Menus};
use super::m20250301_000003_create_audit_logs::AuditLogs;
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One grant per (role, permission) pair
        manager
            .create_index(
                Index::create()
                    .name("idx_role_permissions_role_permission")
                    .table(RolePermissions::Table)
                    .col(RolePermissions::RoleId)
                    .col(RolePermissions::PermissionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // One assignment per (user, role) pair
        manager
            .create_index(
                Index::create()
                    .name("idx_user_roles_user_role")
                    .table(UserRoles::Table)
                    .col(UserRoles::UserId)
                    .col(UserRoles::RoleId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Reverse lookup: users holding a role
        manager
            .create_index(
                Index::create()
                    .name("idx_user_roles_role_id")
                    .table(UserRoles::Table)
                    .col(UserRoles::RoleId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_permissions_resource")
                    .table(Permissions::Table)
                    .col(Permissions::Resource)
                    .to_owned(),
            )
            .await?;

        // Sibling listing in display order
        manager
            .create_index(
                Index::create()
                    .name("idx_menus_parent_order")
                    .table(Menus::Table)
                    .col(Menus::ParentId)
                    .col(Menus::OrderIndex)
                    .to_owned(),
            )
            .await?;

        // At most one capability record per (menu, role)
        manager
            .create_index(
                Index::create()
                    .name("idx_menu_permissions_menu_role")
                    .table(MenuPermissions::Table)
                    .col(MenuPermissions::MenuId)
                    .col(MenuPermissions::RoleId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_menu_permissions_role_id")
                    .table(MenuPermissions::Table)
                    .col(MenuPermissions::RoleId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_logs_action")
                    .table(AuditLogs::Table)
                    .col(AuditLogs::Action)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let indexes = vec![
            "idx_audit_logs_action",
            "idx_menu_permissions_role_id",
            "idx_menu_permissions_menu_role",
            "idx_menus_parent_order",
            "idx_permissions_resource",
            "idx_user_roles_role_id",
            "idx_user_roles_user_role",
            "idx_role_permissions_role_permission",
        ];

        for index_name in indexes {
            manager
                .drop_index(Index::drop().name(index_name).to_owned())
                .await?;
        }

        Ok(())
    }
}
