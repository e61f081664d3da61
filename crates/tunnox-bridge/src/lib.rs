//! The bridge: the core of the data plane. Pairs a source connection
//! with a target (local or cross-node) and moves bytes between them
//! under rate-limit and quota control, accounting for every byte and
//! reporting usage to a cloud-control collaborator on a timer.
//!
//! Grounded on `tunnel-agent/src/forwarder.rs`'s split read/write task
//! pair for the pump shape, and `localup-control`'s connection-manager
//! lock/lifecycle pattern for the once-only close.

mod bridge;
mod counters;
mod cross_node;
mod pump;
mod reporter;
mod state;

pub use bridge::{bytes_received, bytes_sent, mapping_id, tunnel_id, Bridge, BridgeConfig};
pub use counters::CounterHandle;
pub use cross_node::CrossNodeConnection;
pub use pump::Direction;
pub use state::BridgeState;
