//! Control-plane wire types for the tunnel data-plane.
//!
//! This crate only carries what the bridge's collaborators need to agree
//! on the wire: the tunnel-setup handshake messages, the length-prefixed
//! framing used where an explicit datagram boundary is required, and the
//! waiting-tunnel routing record. It does not carry the REST/HTTP/TLS
//! message set the teacher's protocol crate defines for its gateway
//! surface — that surface is out of scope here.

pub mod codec;
pub mod messages;
pub mod waiting_state;

pub use codec::{CodecError, FrameCodec};
pub use messages::TunnelMessage;
pub use waiting_state::WaitingState;

/// Protocol version negotiated on the control stream.
pub const PROTOCOL_VERSION: u32 = 1;
