use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Conversations {
    Table,
    Id,
    TenantId,
    ManagerId,
    LastMessageTime,
    CreatedAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250120_000002_create_conversations_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Conversations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Conversations::TenantId).string().not_null())
                    .col(ColumnDef::new(Conversations::ManagerId).string().not_null())
                    .col(ColumnDef::new(Conversations::LastMessageTime).big_integer())
                    .col(
                        ColumnDef::new(Conversations::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One conversation per tenant/manager pair
        manager
            .create_index(
                Index::create()
                    .name("idx_conversations_pair")
                    .table(Conversations::Table)
                    .col(Conversations::TenantId)
                    .col(Conversations::ManagerId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_conversations_last_message_time")
                    .table(Conversations::Table)
                    .col(Conversations::LastMessageTime)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_conversations_last_message_time")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_conversations_pair").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Conversations::Table).to_owned())
            .await
    }
}
