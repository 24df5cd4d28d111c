pub mod audit_logs;
pub mod menu_permissions;
pub mod menus;
pub mod permissions;
pub mod role_permissions;
pub mod roles;
pub mod user_roles;
pub mod users;

pub use audit_logs::{
    ActiveModel as AuditLogActiveModel, Column as AuditLogColumn, Entity as AuditLogs,
    Model as AuditLog,
};
pub use menu_permissions::{
    ActiveModel as MenuPermissionActiveModel, Column as MenuPermissionColumn,
    Entity as MenuPermissions, Model as MenuPermission,
};
pub use menus::{
    ActiveModel as MenuActiveModel, Column as MenuColumn, Entity as Menus, Model as Menu,
};
pub use permissions::{
    ActiveModel as PermissionActiveModel, Column as PermissionColumn, Entity as Permissions,
    Model as Permission,
};
pub use role_permissions::{
    ActiveModel as RolePermissionActiveModel, Column as RolePermissionColumn,
    Entity as RolePermissions, Model as RolePermission,
};
pub use roles::{
    ActiveModel as RoleActiveModel, Column as RoleColumn, Entity as Roles, Model as Role,
};
pub use user_roles::{
    ActiveModel as UserRoleActiveModel, Column as UserRoleColumn, Entity as UserRoles,
    Model as UserRole,
};
pub use users::{
    ActiveModel as UserActiveModel, Column as UserColumn, Entity as Users, Model as User,
};
