//! A persistent port-forwarding record a tunnel realises. Traffic stats
//! are keyed by this record's id, not by any particular tunnel's id,
//! since a mapping outlives any single tunnel connection.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mappings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub client_id: i64,

    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub target_host: String,

    pub target_port: i32,

    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::traffic_stats::Entity")]
    TrafficStats,
}

impl Related<super::traffic_stats::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrafficStats.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
