//! Cloud-control collaborator interface the bridge's reporter and
//! session layer depend on, plus a SeaORM-backed implementation.

use crate::entities::{mapping, traffic_stats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub id: String,
    pub client_id: i64,
    pub target_host: String,
    pub target_port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrafficStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("mapping not found: {0}")]
    MappingNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

#[async_trait]
pub trait CloudControl: Send + Sync {
    async fn get_port_mapping(&self, mapping_id: &str) -> Result<Mapping, ControlError>;
    /// Current stored totals for `mapping_id`, or zeroed totals if none
    /// have been recorded yet. Callers accumulate deltas onto this
    /// before calling `update_port_mapping_stats`, rather than
    /// overwriting it directly.
    async fn get_port_mapping_stats(&self, mapping_id: &str) -> Result<TrafficStats, ControlError>;
    async fn update_port_mapping_stats(&self, mapping_id: &str, stats: &TrafficStats) -> Result<(), ControlError>;
    async fn get_client_port_mappings(&self, client_id: i64) -> Result<Vec<Mapping>, ControlError>;
    async fn touch_client(&self, client_id: i64) -> Result<(), ControlError>;
    async fn disconnect_client(&self, client_id: i64) -> Result<(), ControlError>;
}

pub struct SeaOrmCloudControl {
    db: DatabaseConnection,
}

impl SeaOrmCloudControl {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_domain(model: mapping::Model) -> Mapping {
    Mapping {
        id: model.id,
        client_id: model.client_id,
        target_host: model.target_host,
        target_port: model.target_port as u16,
    }
}

#[async_trait]
impl CloudControl for SeaOrmCloudControl {
    async fn get_port_mapping(&self, mapping_id: &str) -> Result<Mapping, ControlError> {
        mapping::Entity::find_by_id(mapping_id.to_string())
            .one(&self.db)
            .await?
            .map(to_domain)
            .ok_or_else(|| ControlError::MappingNotFound(mapping_id.to_string()))
    }

    async fn get_port_mapping_stats(&self, mapping_id: &str) -> Result<TrafficStats, ControlError> {
        let row = traffic_stats::Entity::find_by_id(mapping_id.to_string()).one(&self.db).await?;
        Ok(row
            .map(|row| TrafficStats { bytes_sent: row.bytes_sent as u64, bytes_received: row.bytes_received as u64 })
            .unwrap_or_default())
    }

    async fn update_port_mapping_stats(&self, mapping_id: &str, stats: &TrafficStats) -> Result<(), ControlError> {
        let existing = traffic_stats::Entity::find_by_id(mapping_id.to_string()).one(&self.db).await?;
        let now: DateTime<Utc> = Utc::now();

        let active = match existing {
            Some(row) => {
                let mut active: traffic_stats::ActiveModel = row.into();
                active.bytes_sent = Set(stats.bytes_sent as i64);
                active.bytes_received = Set(stats.bytes_received as i64);
                active.last_updated = Set(now);
                active
            }
            None => traffic_stats::ActiveModel {
                mapping_id: Set(mapping_id.to_string()),
                bytes_sent: Set(stats.bytes_sent as i64),
                bytes_received: Set(stats.bytes_received as i64),
                last_updated: Set(now),
            },
        };

        active.save(&self.db).await?;
        info!(mapping_id, bytes_sent = stats.bytes_sent, bytes_received = stats.bytes_received, "traffic stats updated");
        Ok(())
    }

    async fn get_client_port_mappings(&self, client_id: i64) -> Result<Vec<Mapping>, ControlError> {
        let rows = mapping::Entity::find()
            .filter(mapping::Column::ClientId.eq(client_id))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(to_domain).collect())
    }

    async fn touch_client(&self, client_id: i64) -> Result<(), ControlError> {
        // Client liveness is tracked by the session layer's own heartbeat
        // timestamp, not persisted here; this is a log-only hook so a
        // cloud-control implementation with a real presence table can
        // override it without changing the trait.
        info!(client_id, "client touched");
        Ok(())
    }

    async fn disconnect_client(&self, client_id: i64) -> Result<(), ControlError> {
        warn!(client_id, "client disconnect requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect, migrate};

    async fn seeded_mapping(db: &DatabaseConnection, id: &str, client_id: i64) {
        let now = Utc::now();
        mapping::ActiveModel {
            id: Set(id.to_string()),
            client_id: Set(client_id),
            target_host: Set("localhost".to_string()),
            target_port: Set(8080),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn get_port_mapping_maps_row_to_domain_type() {
        let db = connect("sqlite::memory:").await.unwrap();
        migrate(&db).await.unwrap();
        seeded_mapping(&db, "m-1", 42).await;

        let control = SeaOrmCloudControl::new(db);
        let found = control.get_port_mapping("m-1").await.unwrap();
        assert_eq!(found.client_id, 42);
        assert_eq!(found.target_port, 8080);
    }

    #[tokio::test]
    async fn get_port_mapping_missing_row_is_not_found() {
        let db = connect("sqlite::memory:").await.unwrap();
        migrate(&db).await.unwrap();

        let control = SeaOrmCloudControl::new(db);
        let err = control.get_port_mapping("ghost").await.unwrap_err();
        assert!(matches!(err, ControlError::MappingNotFound(_)));
    }

    #[tokio::test]
    async fn update_port_mapping_stats_then_get_client_mappings_round_trips() {
        let db = connect("sqlite::memory:").await.unwrap();
        migrate(&db).await.unwrap();
        seeded_mapping(&db, "m-2", 7).await;

        let control = SeaOrmCloudControl::new(db);
        control
            .update_port_mapping_stats("m-2", &TrafficStats { bytes_sent: 1024, bytes_received: 2048 })
            .await
            .unwrap();

        let mappings = control.get_client_port_mappings(7).await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].id, "m-2");
    }

    #[tokio::test]
    async fn get_port_mapping_stats_defaults_to_zero_then_reflects_updates() {
        let db = connect("sqlite::memory:").await.unwrap();
        migrate(&db).await.unwrap();
        seeded_mapping(&db, "m-3", 9).await;

        let control = SeaOrmCloudControl::new(db);
        let stats = control.get_port_mapping_stats("m-3").await.unwrap();
        assert_eq!(stats, TrafficStats::default());

        control
            .update_port_mapping_stats("m-3", &TrafficStats { bytes_sent: 512, bytes_received: 256 })
            .await
            .unwrap();

        let stats = control.get_port_mapping_stats("m-3").await.unwrap();
        assert_eq!(stats, TrafficStats { bytes_sent: 512, bytes_received: 256 });
    }
}
