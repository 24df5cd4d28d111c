//! Data models for the RBAC engine

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use gatehouse_storage::entities::{MenuPermission, Permission, Role, User};
use serde::{Deserialize, Serialize};

use crate::error::{RbacError, RbacResult};

/// Matches any single segment of a permission name
pub const WILDCARD: &str = "*";

/// Actor id used for writes that no user initiated (bootstrap seeding)
pub const SYSTEM_ACTOR: i32 = 0;

/// Parsed `resource:action` permission name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionName {
    pub resource: String,
    pub action: String,
}

/// How a held permission satisfied a requested one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantMatch {
    Exact,
    Wildcard,
}

impl PermissionName {
    /// Parse and validate a permission name of the form `resource:action`
    pub fn parse(name: &str) -> RbacResult<Self> {
        let invalid = |reason: &str| RbacError::InvalidPermissionName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let (resource, action) = name
            .split_once(':')
            .ok_or_else(|| invalid("expected the form 'resource:action'"))?;

        if action.contains(':') {
            return Err(invalid("expected exactly one ':' separator"));
        }

        for (label, segment) in [("resource", resource), ("action", action)] {
            if segment.is_empty() {
                return Err(invalid(&format!("{} cannot be empty", label)));
            }
            if segment.chars().any(char::is_whitespace) {
                return Err(invalid(&format!("{} cannot contain whitespace", label)));
            }
        }

        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }

    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> RbacResult<Self> {
        Self::parse(&format!("{}:{}", resource.into(), action.into()))
    }

    pub fn is_wildcard(&self) -> bool {
        self.resource == WILDCARD || self.action == WILDCARD
    }

    /// Whether holding `self` grants `requested`.
    ///
    /// `*` stands for exactly one whole segment; partial globs are literal.
    pub fn grants(&self, requested: &PermissionName) -> Option<GrantMatch> {
        if self == requested {
            return Some(GrantMatch::Exact);
        }

        let resource_ok = self.resource == WILDCARD || self.resource == requested.resource;
        let action_ok = self.action == WILDCARD || self.action == requested.action;

        (resource_ok && action_ok).then_some(GrantMatch::Wildcard)
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for PermissionName {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One of the four per-menu capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    View,
    Edit,
    Delete,
    Export,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::View,
        Capability::Edit,
        Capability::Delete,
        Capability::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Edit => "edit",
            Capability::Delete => "delete",
            Capability::Export => "export",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let bare = normalized
            .strip_prefix("can_")
            .or_else(|| normalized.strip_prefix("can"))
            .unwrap_or(&normalized);

        match bare {
            "view" => Ok(Capability::View),
            "edit" => Ok(Capability::Edit),
            "delete" => Ok(Capability::Delete),
            "export" => Ok(Capability::Export),
            _ => Err(RbacError::InvalidCapability {
                value: s.to_string(),
            }),
        }
    }
}

/// The four capability flags of a menu grant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_export: bool,
}

impl CapabilityFlags {
    pub fn all() -> Self {
        Self {
            can_view: true,
            can_edit: true,
            can_delete: true,
            can_export: true,
        }
    }

    pub fn view_only() -> Self {
        Self {
            can_view: true,
            ..Self::default()
        }
    }

    /// True when at least one flag is set
    pub fn any(&self) -> bool {
        self.can_view || self.can_edit || self.can_delete || self.can_export
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::View => self.can_view,
            Capability::Edit => self.can_edit,
            Capability::Delete => self.can_delete,
            Capability::Export => self.can_export,
        }
    }

    /// Flag-wise logical OR
    pub fn or(self, other: CapabilityFlags) -> CapabilityFlags {
        CapabilityFlags {
            can_view: self.can_view || other.can_view,
            can_edit: self.can_edit || other.can_edit,
            can_delete: self.can_delete || other.can_delete,
            can_export: self.can_export || other.can_export,
        }
    }
}

impl From<&MenuPermission> for CapabilityFlags {
    fn from(record: &MenuPermission) -> Self {
        Self {
            can_view: record.can_view,
            can_edit: record.can_edit,
            can_delete: record.can_delete,
            can_export: record.can_export,
        }
    }
}

/// Partial flag update; `None` keeps the stored value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_view: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_edit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_delete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_export: Option<bool>,
}

impl CapabilityUpdate {
    /// Set every flag explicitly
    pub fn exact(flags: CapabilityFlags) -> Self {
        Self {
            can_view: Some(flags.can_view),
            can_edit: Some(flags.can_edit),
            can_delete: Some(flags.can_delete),
            can_export: Some(flags.can_export),
        }
    }

    pub fn apply_to(&self, base: CapabilityFlags) -> CapabilityFlags {
        CapabilityFlags {
            can_view: self.can_view.unwrap_or(base.can_view),
            can_edit: self.can_edit.unwrap_or(base.can_edit),
            can_delete: self.can_delete.unwrap_or(base.can_delete),
            can_export: self.can_export.unwrap_or(base.can_export),
        }
    }
}

/// Requested flag change for one menu of a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuPermissionUpdate {
    pub menu_id: i32,
    #[serde(flatten)]
    pub flags: CapabilityUpdate,
}

/// Reason an item of a bulk operation failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub id: i32,
    pub error: String,
}

/// Per-item outcome of a best-effort bulk operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub success: Vec<i32>,
    pub failed: Vec<BulkFailure>,
}

impl BulkResult {
    pub fn record_success(&mut self, id: i32) {
        self.success.push(id);
    }

    pub fn record_failure(&mut self, id: i32, error: impl ToString) {
        self.failed.push(BulkFailure {
            id,
            error: error.to_string(),
        });
    }

    /// Some items succeeded and some failed
    pub fn is_partial(&self) -> bool {
        !self.success.is_empty() && !self.failed.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<i32> {
        self.failed.iter().map(|f| f.id).collect()
    }
}

/// New role request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: Vec<i32>,
}

/// Role changes; `None` leaves the field as is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    /// Replaces the whole permission set atomically
    pub permission_ids: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneRoleOptions {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub include_permissions: bool,
    #[serde(default)]
    pub include_menu_permissions: bool,
}

/// A role with its permissions and assignment count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDetails {
    pub role: Role,
    pub permissions: Vec<Permission>,
    pub user_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPermission {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    #[serde(default)]
    pub is_superuser: bool,
}

/// A user and the roles assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    pub user: User,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMenu {
    pub parent_id: Option<i32>,
    pub title: String,
    pub path: Option<String>,
    pub icon: Option<String>,
    /// Appended after the last sibling when absent
    pub order_index: Option<i32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewMenu {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            parent_id: None,
            title: title.into(),
            path: None,
            icon: None,
            order_index: None,
            is_active: true,
        }
    }

    pub fn under(mut self, parent_id: i32) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Menu changes; `None` leaves the field as is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuUpdate {
    pub title: Option<String>,
    pub path: Option<Option<String>>,
    pub icon: Option<Option<String>>,
    pub order_index: Option<i32>,
    pub is_active: Option<bool>,
    /// Reparent; goes through the same cycle check as a move
    pub parent_id: Option<Option<i32>>,
}

/// Position of one menu in a reorder batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOrder {
    pub menu_id: i32,
    pub order_index: i32,
}

/// Administrative tree filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuFilter {
    /// Case-insensitive substring of the title or path
    pub search: Option<String>,
    pub is_active: Option<bool>,
    /// Restrict to the descendants of this menu
    pub parent_id: Option<i32>,
}

/// Menu tree node as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuNode {
    pub id: i32,
    pub parent_id: Option<i32>,
    pub title: String,
    pub path: Option<String>,
    pub icon: Option<String>,
    pub order_index: i32,
    pub is_active: bool,
    /// Aggregated flags; absent on administrative trees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<CapabilityFlags>,
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    /// Total node count of this subtree
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(MenuNode::size).sum::<usize>()
    }

    /// Depth-first search for a node by id
    pub fn find(&self, id: i32) -> Option<&MenuNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Aggregate shape of the menu tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuStatistics {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    /// Levels in the deepest branch; a lone root has depth 1
    pub max_depth: usize,
    /// Mean child count over menus that have children
    pub average_branching_factor: f64,
}

/// Role and its name, as reported by access checks and the matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: i32,
    pub name: String,
}

/// Outcome of a menu capability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuAccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub granting_roles: Vec<RoleRef>,
}

impl MenuAccessDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            granting_roles: Vec::new(),
        }
    }

    pub fn allowed(granting_roles: Vec<RoleRef>) -> Self {
        Self {
            allowed: true,
            reason: None,
            granting_roles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRole {
    pub id: i32,
    pub name: String,
    pub is_system: bool,
}

/// One menu of the matrix; `cells` is keyed by role id, absent means no grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub menu_id: i32,
    pub parent_id: Option<i32>,
    pub title: String,
    pub depth: usize,
    pub is_active: bool,
    pub cells: BTreeMap<i32, CapabilityFlags>,
}

/// Role x menu capability view, menus in tree pre-order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMatrix {
    pub roles: Vec<MatrixRole>,
    pub rows: Vec<MatrixRow>,
}

impl PermissionMatrix {
    pub fn cell(&self, menu_id: i32, role_id: i32) -> Option<CapabilityFlags> {
        self.rows
            .iter()
            .find(|row| row.menu_id == menu_id)
            .and_then(|row| row.cells.get(&role_id).copied())
    }
}

/// Drop repeated ids, keeping the first occurrence
pub(crate) fn dedup_ids(ids: &[i32]) -> Vec<i32> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Trim an optional text field, mapping blank to `None`
pub(crate) fn normalize_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
