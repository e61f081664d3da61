//! Database entities

pub mod mapping;
pub mod traffic_stats;

pub use mapping::Entity as Mapping;
pub use traffic_stats::Entity as TrafficStats;

pub mod prelude {
    pub use super::mapping::Entity as Mapping;
    pub use super::traffic_stats::Entity as TrafficStats;
}
