//! The handle a bridge holds when its target lives on a different
//! node. In that shape the bridge itself never reads or writes a byte:
//! the session layer that owns the cross-node link does the actual
//! copying and drives the bridge's counters directly through
//! [`crate::Bridge::bytes_sent_handle`] / [`crate::Bridge::bytes_received_handle`].

use async_trait::async_trait;

/// Implemented by whatever owns the actual cross-node connection
/// (typically something in the session layer holding a second
/// transport dial to the node the target really lives on).
#[async_trait]
pub trait CrossNodeConnection: Send + Sync {
    fn node_id(&self) -> &str;

    /// Called by the bridge's `close` to give the handle back to its
    /// owner. Must not tear down the underlying connection — the
    /// bridge never owns a cross-node link, only a reference to one.
    async fn release(&self);
}
