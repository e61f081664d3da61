//! The bridge's externally-observable lifecycle state, mirroring the
//! state machine in the specification:
//!
//! ```text
//! (new) -> waiting-for-target --timeout(30s)--> closed(err=timeout)
//! waiting-for-target --ready signal--> streaming --pump EOF/error--> closing --> closed
//! streaming --ctx cancelled--> closing --> closed
//! ```
//!
//! `closed` is terminal and reached exactly once, enforced by the
//! bridge's `close_once` cell rather than by this enum itself.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    WaitingForTarget,
    Streaming,
    Closing,
    Closed,
}
