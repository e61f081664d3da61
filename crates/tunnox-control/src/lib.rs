//! Persistence for the cloud-control collaborator: port-mapping
//! definitions and the traffic-stats deltas the bridge's reporter
//! pushes into them.
//!
//! Grounded on `localup-relay-db`'s SeaORM entity/migrator structure,
//! narrowed to the `mapping`/`traffic_stats` pair this system actually
//! needs — the teacher's user/team/domain/captured-request entities
//! back the out-of-scope REST and HTTP-capture surfaces and are not
//! carried here.

pub mod control;
pub mod entities;
pub mod migrator;

pub use control::{CloudControl, ControlError, Mapping, SeaOrmCloudControl, TrafficStats};

use migrator::Migrator;
use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(url).await
}

pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    Migrator::up(db, None).await
}
