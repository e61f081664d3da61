//! Crate-local error type, converted into the shared coded taxonomy at
//! the boundary where a session-layer result crosses into the bridge.

use thiserror::Error;
use tunnox_connection::ConnectionError;
use tunnox_router::RoutingError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("no bridge registered for tunnel {0}")]
    UnknownTunnel(String),

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error("cross-node operation requires a routing table, none configured")]
    RoutingNotConfigured,

    #[error("node address is not a valid socket address: {0}")]
    InvalidNodeAddress(String),

    #[error("failed to resolve target address: {0}")]
    TargetResolution(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Bridge(#[from] tunnox_errors::Error),
}

impl From<SessionError> for tunnox_errors::Error {
    fn from(err: SessionError) -> Self {
        use tunnox_errors::{Error, ErrorKind};
        match err {
            SessionError::AuthFailed(msg) => Error::new(ErrorKind::Auth, msg),
            SessionError::UnknownTunnel(id) => Error::not_found(format!("unknown tunnel: {id}")),
            SessionError::ReconnectExhausted => Error::new(ErrorKind::Unavailable, "reconnect attempts exhausted"),
            SessionError::RoutingNotConfigured => Error::new(ErrorKind::NotConfigured, "routing not configured"),
            SessionError::InvalidNodeAddress(msg) => Error::new(ErrorKind::Storage, msg),
            SessionError::TargetResolution(msg) => Error::new(ErrorKind::Connection, msg),
            SessionError::Connection(e) => Error::new(ErrorKind::Connection, e.to_string()).with_source(e),
            SessionError::Routing(e) => {
                let kind = match e {
                    RoutingError::NotFound => ErrorKind::NotFound,
                    RoutingError::Expired => ErrorKind::Expired,
                    RoutingError::Storage(_) => ErrorKind::Storage,
                };
                Error::new(kind, e.to_string())
            }
            SessionError::Bridge(e) => e,
        }
    }
}
