//! The bridge itself: pairs a source and a target [`TunnelConnection`]
//! and pumps bytes between them under rate/quota control, or — when a
//! cross-node handle is attached — steps aside and lets the session
//! layer do the copying while still exposing the counters it updates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tunnox_connection::TunnelConnection;
use tunnox_control::CloudControl;
use tunnox_errors::{Error, ErrorKind, Result};
use tunnox_ratelimit::{QuotaController, TokenBucket};

use crate::counters::CounterHandle;
use crate::cross_node::CrossNodeConnection;
use crate::state::BridgeState;

pub(crate) const WAIT_FOR_TARGET_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const FINAL_REPORT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Everything a [`Bridge`] needs at construction time. Every
/// collaborator beyond the tunnel identity is optional: a bridge with
/// no rate limit, no quota controller and no cloud-control attached is
/// just an unthrottled, unreported byte pump.
pub struct BridgeConfig {
    pub tunnel_id: String,
    pub mapping_id: Option<String>,
    pub rate_limit_bytes_per_sec: Option<u64>,
    pub quota_controller: Option<Arc<dyn QuotaController>>,
    pub cloud_control: Option<Arc<dyn CloudControl>>,
}

impl BridgeConfig {
    pub fn new(tunnel_id: impl Into<String>) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            mapping_id: None,
            rate_limit_bytes_per_sec: None,
            quota_controller: None,
            cloud_control: None,
        }
    }
}

pub struct Bridge {
    pub(crate) tunnel_id: String,
    pub(crate) mapping_id: Option<String>,

    pub(crate) source: RwLock<Option<TunnelConnection>>,
    pub(crate) target: RwLock<Option<TunnelConnection>>,
    pub(crate) cross_node: RwLock<Option<Arc<dyn CrossNodeConnection>>>,

    pub(crate) limiter: RwLock<Option<Arc<TokenBucket>>>,
    pub(crate) quota_controller: Option<Arc<dyn QuotaController>>,
    pub(crate) cloud_control: Option<Arc<dyn CloudControl>>,

    pub(crate) bytes_sent: CounterHandle,
    pub(crate) bytes_received: CounterHandle,
    pub(crate) last_reported_sent: AtomicU64,
    pub(crate) last_reported_received: AtomicU64,

    pub(crate) ready: Notify,
    pub(crate) ready_fired: AtomicBool,
    pub(crate) closing: AtomicBool,
    pub(crate) close_once: OnceCell<Vec<String>>,
    pub(crate) cancel: CancellationToken,
}

impl Bridge {
    pub fn new(cfg: BridgeConfig) -> Arc<Self> {
        let limiter = cfg
            .rate_limit_bytes_per_sec
            .map(|rate| Arc::new(TokenBucket::new(rate)));

        Arc::new(Self {
            tunnel_id: cfg.tunnel_id,
            mapping_id: cfg.mapping_id,
            source: RwLock::new(None),
            target: RwLock::new(None),
            cross_node: RwLock::new(None),
            limiter: RwLock::new(limiter),
            quota_controller: cfg.quota_controller,
            cloud_control: cfg.cloud_control,
            bytes_sent: CounterHandle::new(),
            bytes_received: CounterHandle::new(),
            last_reported_sent: AtomicU64::new(0),
            last_reported_received: AtomicU64::new(0),
            ready: Notify::new(),
            ready_fired: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            close_once: OnceCell::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn tunnel_id(&self) -> &str {
        &self.tunnel_id
    }

    pub fn mapping_id(&self) -> Option<&str> {
        self.mapping_id.as_deref()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.get()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.get()
    }

    /// Handle the cross-node splice path updates directly, bypassing
    /// the bridge's own pump and its locks.
    pub fn bytes_sent_handle(&self) -> CounterHandle {
        self.bytes_sent.clone()
    }

    pub fn bytes_received_handle(&self) -> CounterHandle {
        self.bytes_received.clone()
    }

    pub fn state(&self) -> BridgeState {
        if self.close_once.initialized() {
            BridgeState::Closed
        } else if self.closing.load(Ordering::Acquire) {
            BridgeState::Closing
        } else if self.ready_fired.load(Ordering::Acquire) {
            BridgeState::Streaming
        } else {
            BridgeState::WaitingForTarget
        }
    }

    /// Replaces (or clears) the source connection. The previous
    /// forwarder, if any, is dropped immediately — any bytes still
    /// buffered in its read half are discarded, not drained, since the
    /// target->source pump re-resolves the current source forwarder on
    /// every write and there is no handoff queue to drain into.
    pub async fn set_source_connection(&self, conn: Option<TunnelConnection>) {
        *self.source.write().await = conn;
    }

    /// Installs the target connection and signals ready.
    pub async fn set_target_connection(&self, conn: TunnelConnection) {
        *self.target.write().await = Some(conn);
        self.signal_ready();
    }

    /// Signals ready without installing a local target. Used by the
    /// cross-node path, where the target lives on another node and
    /// `start` should skip straight to deferring.
    pub fn notify_target_ready(&self) {
        self.signal_ready();
    }

    /// Marks this bridge cross-node: `start` defers all forwarding to
    /// whoever owns `handle` instead of running local pumps. Does not
    /// itself signal ready — call [`Self::notify_target_ready`]
    /// alongside it.
    pub async fn set_cross_node_connection(&self, handle: Arc<dyn CrossNodeConnection>) {
        *self.cross_node.write().await = Some(handle);
    }

    pub async fn is_cross_node(&self) -> bool {
        self.cross_node.read().await.is_some()
    }

    fn signal_ready(&self) {
        if !self.ready_fired.swap(true, Ordering::AcqRel) {
            self.ready.notify_waiters();
        }
    }

    /// Waits until a target (local or cross-node) has been attached,
    /// or `timeout` elapses.
    pub async fn wait_for_target(&self, timeout: Duration) -> Result<()> {
        let notified = self.ready.notified();
        if self.ready_fired.load(Ordering::Acquire) {
            return Ok(());
        }
        match tokio::time::timeout(timeout, notified).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::timeout("bridge timed out waiting for a target connection")
                .with_detail("tunnel_id", self.tunnel_id.as_str())),
        }
    }

    pub(crate) async fn source_forwarder(&self) -> Option<Arc<dyn tunnox_connection::Forwarder>> {
        self.source.read().await.as_ref().map(|c| c.forwarder())
    }

    /// Source-side forwarder, exposed for whoever owns this bridge's
    /// [`CrossNodeConnection`] to pump bytes itself — `start`'s
    /// cross-node branch never spawns the in-process pumps, so this is
    /// the only way the other side of the splice reaches the source.
    pub async fn source_forwarder_for_relay(&self) -> Option<Arc<dyn tunnox_connection::Forwarder>> {
        self.source_forwarder().await
    }

    pub(crate) async fn target_forwarder(&self) -> Option<Arc<dyn tunnox_connection::Forwarder>> {
        self.target.read().await.as_ref().map(|c| c.forwarder())
    }

    pub(crate) async fn limiter(&self) -> Option<Arc<TokenBucket>> {
        self.limiter.read().await.clone()
    }

    pub(crate) async fn ensure_throttled(&self, rate_bytes_per_sec: u64) {
        let mut slot = self.limiter.write().await;
        match slot.as_ref() {
            Some(bucket) => bucket.set_rate(rate_bytes_per_sec).await,
            None => *slot = Some(Arc::new(TokenBucket::new(rate_bytes_per_sec))),
        }
    }

    /// Runs the bridge: waits for a target, then either defers to the
    /// cross-node owner or launches the two pump directions as
    /// independent tasks. Returns once both pumps (or the cross-node
    /// wait) have finished; either pump finishing triggers the
    /// once-only `close`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        tokio::select! {
            res = self.wait_for_target(WAIT_FOR_TARGET_TIMEOUT) => res?,
            _ = self.cancel.cancelled() => {
                return Err(Error::cancelled("bridge closed while waiting for a target")
                    .with_detail("tunnel_id", self.tunnel_id.as_str()));
            }
        }

        self.spawn_reporter();

        if self.is_cross_node().await {
            self.cancel.cancelled().await;
            return Ok(());
        }

        let source_to_target = tokio::spawn({
            let bridge = self.clone();
            async move { crate::pump::run(&bridge, crate::pump::Direction::SourceToTarget).await }
        });
        let target_to_source = tokio::spawn({
            let bridge = self.clone();
            async move { crate::pump::run(&bridge, crate::pump::Direction::TargetToSource).await }
        });

        let _ = tokio::join!(source_to_target, target_to_source);
        Ok(())
    }

    /// Closes the bridge exactly once: cancels the shared context,
    /// releases (not closes) any cross-node handle, closes both
    /// tunnel connections, and pushes a final traffic-stats delta
    /// bounded by a short timeout. Safe to call from either pump, the
    /// public API, or more than once concurrently.
    pub async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::Release);
        let errors = self
            .close_once
            .get_or_init(|| async {
                self.cancel.cancel();
                let mut errors = Vec::new();

                if let Some(handle) = self.cross_node.write().await.take() {
                    handle.release().await;
                }

                if let Some(conn) = self.source.write().await.take() {
                    if let Err(e) = conn.close().await {
                        errors.push(format!("source close: {e}"));
                    }
                }
                if let Some(conn) = self.target.write().await.take() {
                    if let Err(e) = conn.close().await {
                        errors.push(format!("target close: {e}"));
                    }
                }

                if tokio::time::timeout(FINAL_REPORT_TIMEOUT, self.report_traffic_stats())
                    .await
                    .is_err()
                {
                    warn!(tunnel_id = self.tunnel_id.as_str(), "final traffic report timed out");
                }

                errors
            })
            .await;

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Cleanup, errors.join("; "))
                .with_detail("tunnel_id", self.tunnel_id.as_str()))
        }
    }
}

/// Nil-safe accessor: a caller holding no bridge at all (the `None`
/// case) reads back zero rather than needing to branch separately.
pub fn bytes_sent(bridge: Option<&Bridge>) -> u64 {
    bridge.map(|b| b.bytes_sent()).unwrap_or(0)
}

/// Nil-safe accessor, see [`bytes_sent`].
pub fn bytes_received(bridge: Option<&Bridge>) -> u64 {
    bridge.map(|b| b.bytes_received()).unwrap_or(0)
}

/// Nil-safe accessor, see [`bytes_sent`].
pub fn tunnel_id(bridge: Option<&Bridge>) -> &str {
    bridge.map(|b| b.tunnel_id()).unwrap_or("")
}

/// Nil-safe accessor, see [`bytes_sent`].
pub fn mapping_id(bridge: Option<&Bridge>) -> Option<&str> {
    bridge.and_then(|b| b.mapping_id())
}
