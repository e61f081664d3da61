//! Minimal control/session layer on top of `tunnox-bridge`: stub
//! authentication, a registry of live bridges keyed by tunnel id, and a
//! reconnect-aware client session for the outbound side.
//!
//! Grounded on `localup-control`'s `TunnelConnectionManager` for the
//! registry shape and `localup-client/src/reverse_tunnel.rs` /
//! `tunnel-connection/src/reconnect.rs` for the client-side reconnect
//! loop, generalized to drive a [`tunnox_bridge::Bridge`] instead of a
//! single hardcoded protocol pair.

mod auth;
mod client;
mod cross_node;
mod error;
mod manager;
mod reconnect;

pub use auth::{Authenticator, AllowAllAuthenticator, ClientIdentity};
pub use client::{ClientSession, ClientSessionConfig};
pub use cross_node::RelayedCrossNodeConnection;
pub use error::SessionError;
pub use manager::{SessionManager, TargetSpec, WaitingTunnelSpec};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};
