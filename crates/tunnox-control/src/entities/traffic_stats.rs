//! Accumulated traffic delta for one mapping. The bridge's reporter
//! pushes deltas here via `UpdatePortMappingStats`; this row holds the
//! running totals, not the delta itself.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "traffic_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub mapping_id: String,

    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub last_updated: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(belongs_to = "super::mapping::Entity", from = "Column::MappingId", to = "super::mapping::Column::Id")]
    Mapping,
}

impl Related<super::mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Mapping.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
