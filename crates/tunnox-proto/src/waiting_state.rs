//! The TTL-bounded routing record a source node publishes while a tunnel
//! is being opened across nodes (spec.md §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default wait budget for a source-side tunnel waiting for its target.
pub const DEFAULT_WAITING_TTL_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingState {
    pub tunnel_id: String,
    pub mapping_id: String,
    pub secret_key: String,
    pub source_node_id: String,
    pub source_client_id: i64,
    pub target_client_id: i64,
    pub target_host: String,
    pub target_port: u16,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WaitingState {
    /// Builds a record with `expires_at = created_at + ttl`, per the
    /// invariant in spec.md §3.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tunnel_id: impl Into<String>,
        mapping_id: impl Into<String>,
        secret_key: impl Into<String>,
        source_node_id: impl Into<String>,
        source_client_id: i64,
        target_client_id: i64,
        target_host: impl Into<String>,
        target_port: u16,
        created_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            mapping_id: mapping_id.into(),
            secret_key: secret_key.into(),
            source_node_id: source_node_id.into(),
            source_client_id,
            target_client_id,
            target_host: target_host.into(),
            target_port,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Whether `now` is past `expires_at`. Consumers must treat an expired
    /// record as absent independent of the backing store's own TTL
    /// eviction (spec.md §3 invariant).
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_follows_created_plus_ttl() {
        let created = Utc::now();
        let state = WaitingState::new(
            "t-1", "m-1", "secret", "node-a", 1, 2, "localhost", 8080, created,
            chrono::Duration::seconds(30),
        );
        assert_eq!(state.expires_at, created + chrono::Duration::seconds(30));
        assert!(!state.is_expired_at(created));
        assert!(state.is_expired_at(created + chrono::Duration::seconds(31)));
    }
}
