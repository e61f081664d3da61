//! Quota evaluation: the bridge consults this every ~1 MiB of
//! accounted traffic to decide whether to hard-cut a tunnel or start
//! throttling it.

use async_trait::async_trait;

/// Snapshot of a tunnel's standing against its configured limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaStatus {
    /// Percentage of the configured limit consumed so far. Values
    /// above 100 are expected transiently; the bridge hard-cuts at 120.
    pub percentage: f64,
    /// Whether the controller wants this tunnel throttled right now.
    pub throttled: bool,
    /// The rate to throttle to, if `throttled` is set.
    pub current_rate_bytes_per_sec: Option<u64>,
}

/// Source of quota decisions for a tunnel. Implemented against
/// `tunnox-control`'s cloud-control client in production; a bridge with
/// no cloud-control attached uses [`NoopQuotaController`] so the
/// re-evaluation step in the copy pump is always safe to call.
#[async_trait]
pub trait QuotaController: Send + Sync {
    async fn evaluate(&self, tunnel_id: &str, bytes_used: u64) -> QuotaStatus;
}

/// Always reports unlimited, unthrottled usage — the default when a
/// bridge has no cloud-control quota source configured.
#[derive(Debug, Default)]
pub struct NoopQuotaController;

#[async_trait]
impl QuotaController for NoopQuotaController {
    async fn evaluate(&self, _tunnel_id: &str, _bytes_used: u64) -> QuotaStatus {
        QuotaStatus::default()
    }
}
