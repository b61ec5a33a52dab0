//! Migration to create the projects table.
//!
//! Projects are owned by the dashboard; this service only reads the columns it
//! needs to decide whether a project exists and is linked to each integration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Projects::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Projects::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Projects::Name).text().not_null())
                    .col(ColumnDef::new(Projects::IssueTrackerUrl).text().null())
                    .col(ColumnDef::new(Projects::IssueTrackerKey).text().null())
                    .col(ColumnDef::new(Projects::ResourcingUrl).text().null())
                    .col(ColumnDef::new(Projects::ResourcingId).text().null())
                    .col(
                        ColumnDef::new(Projects::CreatedAt)
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
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
    Name,
    IssueTrackerUrl,
    IssueTrackerKey,
    ResourcingUrl,
    ResourcingId,
    CreatedAt,
}
