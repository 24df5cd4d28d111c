use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuditLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AuditLogs::EventId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(AuditLogs::ActorId).integer().not_null())
                    .col(ColumnDef::new(AuditLogs::Action).string_len(100).not_null())
                    .col(
                        ColumnDef::new(AuditLogs::ResourceType)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AuditLogs::ResourceId).string_len(255))
                    .col(ColumnDef::new(AuditLogs::Details).json().not_null())
                    .col(
                        ColumnDef::new(AuditLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuditLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(super) enum AuditLogs {
    Table,
    Id,
    EventId,
    ActorId,
    Action,
    ResourceType,
    ResourceId,
    Details,
    CreatedAt,
}
