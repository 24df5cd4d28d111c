//! Navigation menu node
//!
//! `parent_id` is a self-reference; children are derived per query and never stored.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "menus")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub parent_id: Option<i32>,
    pub title: String,
    pub path: Option<String>,
    pub icon: Option<String>,
    /// Position among siblings, ascending
    pub order_index: i32,
    pub is_active: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::menu_permissions::Entity")]
    MenuPermissions,
}

impl Related<super::menu_permissions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MenuPermissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
