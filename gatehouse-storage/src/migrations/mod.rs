use sea_orm_migration::prelude::*;

mod m20250301_000001_create_rbac_tables;
mod m20250301_000002_create_menu_tables;
mod m20250301_000003_create_audit_logs;
mod m20250301_000004_create_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_rbac_tables::Migration),
            Box::new(m20250301_000002_create_menu_tables::Migration),
            Box::new(m20250301_000003_create_audit_logs::Migration),
            Box::new(m20250301_000004_create_indexes::Migration),
        ]
    }
}
