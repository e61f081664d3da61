//! TTL-keyed routing table: "tunnel X is waiting on node Y" records that
//! let a target-side connection find its source-side bridge across
//! nodes.
//!
//! Grounded on `localup-router/src/registry.rs`'s dashmap-backed
//! registry (new/register/lookup/unregister/count), generalized with
//! explicit `expires_at` bookkeeping instead of relying solely on the
//! backing store's own TTL eviction — `expired` and `not-found` are
//! kept as distinct outcomes per spec. The teacher's router crate is
//! otherwise an HTTP/SNI virtual-host router backing the out-of-scope
//! gateway surface; that part is not carried here. The backing store
//! commits to one wire shape, JSON bytes, rather than the teacher's
//! heterogeneous map/bytes/string/pointer/value `Get` result.

pub mod routing;
pub mod storage;

pub use routing::{RoutingError, RoutingTable};
pub use storage::{InMemoryKvStore, KvError, KvStore};
