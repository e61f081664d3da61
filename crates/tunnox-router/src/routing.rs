//! The waiting-tunnel / node-address routing table built atop [`crate::KvStore`].

use crate::storage::{KvError, KvStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use tunnox_proto::WaitingState;

const NODE_ADDRESS_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("not found")]
    NotFound,

    #[error("expired")]
    Expired,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<KvError> for RoutingError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::NotFound => RoutingError::NotFound,
            KvError::Backend(msg) => RoutingError::Storage(msg),
        }
    }
}

fn waiting_key(tunnel_id: &str) -> String {
    format!("tunnox:tunnel_waiting:{tunnel_id}")
}

fn node_key(node_id: &str) -> String {
    format!("tunnox:node:{node_id}:addr")
}

pub struct RoutingTable {
    store: Arc<dyn KvStore>,
}

impl RoutingTable {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Publishes `state`, TTL'd to its own `expires_at - created_at`
    /// span (the bridge's wait budget, 30s by default).
    pub async fn register_waiting_tunnel(&self, state: &WaitingState) -> Result<(), RoutingError> {
        let ttl = (state.expires_at - state.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        let bytes = serde_json::to_vec(state).map_err(|e| RoutingError::Storage(e.to_string()))?;
        self.store.set(&waiting_key(&state.tunnel_id), bytes, ttl).await?;
        Ok(())
    }

    /// Looks up the waiting-tunnel record for `tunnel_id`. Returns
    /// `expired` whenever the record's own `expires_at` is in the past
    /// relative to `now`, even if the backing store has not yet evicted
    /// the key — the routing table's freshness invariant is stricter
    /// than the store's TTL.
    pub async fn lookup_waiting_tunnel(&self, tunnel_id: &str, now: DateTime<Utc>) -> Result<WaitingState, RoutingError> {
        let bytes = self.store.get(&waiting_key(tunnel_id)).await?;
        let state: WaitingState = serde_json::from_slice(&bytes).map_err(|e| RoutingError::Storage(e.to_string()))?;
        if state.is_expired_at(now) {
            return Err(RoutingError::Expired);
        }
        Ok(state)
    }

    /// Deletes the waiting-tunnel record. Failures are logged, not
    /// surfaced — the TTL is the safety net if this delete is lost.
    pub async fn remove_waiting_tunnel(&self, tunnel_id: &str) {
        if let Err(e) = self.store.delete(&waiting_key(tunnel_id)).await {
            warn!(tunnel_id, error = %e, "failed to remove waiting-tunnel record");
        }
    }

    pub async fn register_node_address(&self, node_id: &str, addr: &str) -> Result<(), RoutingError> {
        self.store
            .set(&node_key(node_id), addr.as_bytes().to_vec(), NODE_ADDRESS_TTL)
            .await?;
        Ok(())
    }

    pub async fn get_node_address(&self, node_id: &str) -> Result<String, RoutingError> {
        let bytes = self.store.get(&node_key(node_id)).await?;
        String::from_utf8(bytes).map_err(|e| RoutingError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKvStore;

    fn sample_state(tunnel_id: &str, ttl: chrono::Duration) -> WaitingState {
        let now = Utc::now();
        WaitingState::new(tunnel_id, "m-1", "secret", "node-a", 1, 2, "localhost", 8080, now, ttl)
    }

    #[tokio::test]
    async fn register_then_lookup_returns_the_same_state() {
        let table = RoutingTable::new(Arc::new(InMemoryKvStore::new()));
        let state = sample_state("t-1", chrono::Duration::seconds(30));
        table.register_waiting_tunnel(&state).await.unwrap();

        let found = table.lookup_waiting_tunnel("t-1", Utc::now()).await.unwrap();
        assert_eq!(found.tunnel_id, "t-1");
    }

    #[tokio::test]
    async fn lookup_of_missing_tunnel_is_not_found() {
        let table = RoutingTable::new(Arc::new(InMemoryKvStore::new()));
        let err = table.lookup_waiting_tunnel("ghost", Utc::now()).await.unwrap_err();
        assert!(matches!(err, RoutingError::NotFound));
    }

    #[tokio::test]
    async fn lookup_past_expires_at_is_expired_even_if_store_ttl_has_not_fired() {
        let table = RoutingTable::new(Arc::new(InMemoryKvStore::new()));
        let state = sample_state("t-2", chrono::Duration::seconds(3600));
        table.register_waiting_tunnel(&state).await.unwrap();

        let far_future = Utc::now() + chrono::Duration::seconds(3601);
        let err = table.lookup_waiting_tunnel("t-2", far_future).await.unwrap_err();
        assert!(matches!(err, RoutingError::Expired));
    }

    #[tokio::test]
    async fn remove_then_lookup_is_not_found() {
        let table = RoutingTable::new(Arc::new(InMemoryKvStore::new()));
        let state = sample_state("t-3", chrono::Duration::seconds(30));
        table.register_waiting_tunnel(&state).await.unwrap();
        table.remove_waiting_tunnel("t-3").await;

        let err = table.lookup_waiting_tunnel("t-3", Utc::now()).await.unwrap_err();
        assert!(matches!(err, RoutingError::NotFound));
    }

    #[tokio::test]
    async fn node_address_round_trips() {
        let table = RoutingTable::new(Arc::new(InMemoryKvStore::new()));
        table.register_node_address("node-a", "10.0.0.1:9000").await.unwrap();
        assert_eq!(table.get_node_address("node-a").await.unwrap(), "10.0.0.1:9000");
    }
}
