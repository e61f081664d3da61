//! Consolidated initial schema migration

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum Mapping {
    Table,
    Id,
    ClientId,
    TargetHost,
    TargetPort,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TrafficStats {
    Table,
    MappingId,
    BytesSent,
    BytesReceived,
    LastUpdated,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Mapping::Table)
                    .if_not_exists()
                    .col(string_len(Mapping::Id, 64).primary_key())
                    .col(big_integer(Mapping::ClientId).not_null())
                    .col(string_len(Mapping::TargetHost, 255).not_null())
                    .col(integer(Mapping::TargetPort).not_null())
                    .col(
                        timestamp_with_time_zone(Mapping::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Mapping::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_mappings_client_id")
                    .table(Mapping::Table)
                    .col(Mapping::ClientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TrafficStats::Table)
                    .if_not_exists()
                    .col(string_len(TrafficStats::MappingId, 64).primary_key())
                    .col(big_integer(TrafficStats::BytesSent).not_null().default(0))
                    .col(big_integer(TrafficStats::BytesReceived).not_null().default(0))
                    .col(
                        timestamp_with_time_zone(TrafficStats::LastUpdated)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_traffic_stats_mapping")
                            .from(TrafficStats::Table, TrafficStats::MappingId)
                            .to(Mapping::Table, Mapping::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(TrafficStats::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Mapping::Table).to_owned()).await?;
        Ok(())
    }
}
