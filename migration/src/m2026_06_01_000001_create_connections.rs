//! Migration to create the connections table.
//!
//! One row per website tenant, holding the OAuth token material for the
//! Google grant plus the selected Search Console and GA4 properties. Token
//! columns are NOT NULL so a partially-completed grant can never be persisted.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connections::WebsiteId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Connections::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Connections::RefreshTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Connections::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Connections::Scopes).json_binary().null())
                    .col(ColumnDef::new(Connections::ScProperty).text().null())
                    .col(ColumnDef::new(Connections::Ga4PropertyId).text().null())
                    .col(ColumnDef::new(Connections::GoogleUserEmail).text().null())
                    .col(
                        ColumnDef::new(Connections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connections::UpdatedAt)
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
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    WebsiteId,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    Scopes,
    ScProperty,
    Ga4PropertyId,
    GoogleUserEmail,
    CreatedAt,
    UpdatedAt,
}
