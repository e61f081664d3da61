//! Tunnel setup handshake messages.
//!
//! Everything below the handshake is byte-transparent (spec.md's
//! non-goal: no message ordering guarantee above the byte-stream level).
//! These variants are only what a source or target client exchanges with
//! a server node while a tunnel is being opened.

use serde::{Deserialize, Serialize};

/// Control messages exchanged while a tunnel is being set up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TunnelMessage {
    /// Source client asks its node to open a tunnel to `target_client_id`.
    TunnelOpen {
        tunnel_id: String,
        mapping_id: String,
        client_id: i64,
        target_client_id: i64,
        target_host: String,
        target_port: u16,
    },
    /// The tunnel was accepted and its target side is ready (or will be,
    /// once the target-side connection lands).
    TunnelAccept { tunnel_id: String },
    /// The tunnel could not be set up.
    TunnelReject { tunnel_id: String, reason: String },
    /// Liveness probe on the control connection.
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_equality() {
        let a = TunnelMessage::Ping { timestamp: 1 };
        let b = TunnelMessage::Ping { timestamp: 1 };
        let c = TunnelMessage::Ping { timestamp: 2 };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
