//! Periodic traffic-stats reporting: every 30s (and once more, with a
//! short timeout, at close) the bridge pushes the delta between what
//! it has accounted for and what it last successfully reported to its
//! cloud-control collaborator.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::warn;
use tunnox_control::TrafficStats;

use crate::bridge::{Bridge, REPORT_INTERVAL};

impl Bridge {
    /// Spawns the 30s reporting task. A no-op if this bridge has no
    /// mapping or no cloud-control attached — most direct tunnels never
    /// get here since they have neither.
    pub(crate) fn spawn_reporter(self: &Arc<Self>) {
        if self.mapping_id.is_none() || self.cloud_control.is_none() {
            return;
        }

        let bridge = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REPORT_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = interval.tick() => bridge.report_traffic_stats().await,
                    _ = bridge.cancel.cancelled() => break,
                }
            }
        });
    }

    /// Computes the delta since the last successful report and
    /// accumulates it onto the mapping's current stored totals, so a
    /// reconnect (fresh `Bridge`, zero-based counters) or a second
    /// bridge sharing the same `mapping_id` adds to history instead of
    /// clobbering it. Skips the network round trip entirely when
    /// nothing has moved since the last report.
    pub(crate) async fn report_traffic_stats(&self) {
        let (Some(mapping_id), Some(cloud_control)) = (&self.mapping_id, &self.cloud_control) else {
            return;
        };

        let sent = self.bytes_sent();
        let received = self.bytes_received();
        let last_sent = self.last_reported_sent.load(Ordering::Relaxed);
        let last_received = self.last_reported_received.load(Ordering::Relaxed);

        if sent == last_sent && received == last_received {
            return;
        }

        if let Err(e) = cloud_control.get_port_mapping(mapping_id).await {
            warn!(tunnel_id = self.tunnel_id.as_str(), mapping_id = mapping_id.as_str(), error = %e, "traffic report: mapping lookup failed");
            return;
        }

        let current = match cloud_control.get_port_mapping_stats(mapping_id).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(tunnel_id = self.tunnel_id.as_str(), mapping_id = mapping_id.as_str(), error = %e, "traffic report: stats lookup failed");
                return;
            }
        };

        let stats = TrafficStats {
            bytes_sent: current.bytes_sent + (sent - last_sent),
            bytes_received: current.bytes_received + (received - last_received),
        };
        match cloud_control.update_port_mapping_stats(mapping_id, &stats).await {
            Ok(()) => {
                self.last_reported_sent.store(sent, Ordering::Relaxed);
                self.last_reported_received.store(received, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(tunnel_id = self.tunnel_id.as_str(), mapping_id = mapping_id.as_str(), error = %e, "traffic report: stats push failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use async_trait::async_trait;
    use tunnox_control::{ControlError, Mapping};

    #[derive(Default)]
    struct FakeCloudControl {
        calls: tokio::sync::Mutex<Vec<TrafficStats>>,
        stored: tokio::sync::Mutex<TrafficStats>,
    }

    #[async_trait]
    impl tunnox_control::CloudControl for FakeCloudControl {
        async fn get_port_mapping(&self, mapping_id: &str) -> Result<Mapping, ControlError> {
            Ok(Mapping { id: mapping_id.to_string(), client_id: 1, target_host: "host".into(), target_port: 80 })
        }

        async fn get_port_mapping_stats(&self, _mapping_id: &str) -> Result<TrafficStats, ControlError> {
            Ok(*self.stored.lock().await)
        }

        async fn update_port_mapping_stats(&self, _mapping_id: &str, stats: &TrafficStats) -> Result<(), ControlError> {
            *self.stored.lock().await = *stats;
            self.calls.lock().await.push(*stats);
            Ok(())
        }

        async fn get_client_port_mappings(&self, _client_id: i64) -> Result<Vec<Mapping>, ControlError> {
            Ok(Vec::new())
        }

        async fn touch_client(&self, _client_id: i64) -> Result<(), ControlError> {
            Ok(())
        }

        async fn disconnect_client(&self, _client_id: i64) -> Result<(), ControlError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn traffic_report_pushes_delta_and_skips_when_unchanged() {
        let fake = Arc::new(FakeCloudControl::default());

        let mut cfg = BridgeConfig::new("t-report");
        cfg.mapping_id = Some("m-1".to_string());
        cfg.cloud_control = Some(fake.clone());
        let bridge = Bridge::new(cfg);

        bridge.bytes_sent_handle().add(1024);
        bridge.bytes_received_handle().add(2048);
        bridge.report_traffic_stats().await;
        bridge.report_traffic_stats().await;

        let calls = fake.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].bytes_sent, 1024);
        assert_eq!(calls[0].bytes_received, 2048);
    }

    /// A second bridge reporting against the same `mapping_id` (a
    /// reconnect's fresh `Bridge`, or a concurrent tunnel sharing a
    /// mapping) must add to the first bridge's totals, not clobber them.
    #[tokio::test]
    async fn two_bridges_sharing_a_mapping_accumulate_rather_than_overwrite() {
        let fake = Arc::new(FakeCloudControl::default());

        let mut cfg_a = BridgeConfig::new("t-report-a");
        cfg_a.mapping_id = Some("m-shared".to_string());
        cfg_a.cloud_control = Some(fake.clone());
        let bridge_a = Bridge::new(cfg_a);
        bridge_a.bytes_sent_handle().add(1000);
        bridge_a.bytes_received_handle().add(500);
        bridge_a.report_traffic_stats().await;

        let mut cfg_b = BridgeConfig::new("t-report-b");
        cfg_b.mapping_id = Some("m-shared".to_string());
        cfg_b.cloud_control = Some(fake.clone());
        let bridge_b = Bridge::new(cfg_b);
        bridge_b.bytes_sent_handle().add(300);
        bridge_b.bytes_received_handle().add(200);
        bridge_b.report_traffic_stats().await;

        let stored = *fake.stored.lock().await;
        assert_eq!(stored.bytes_sent, 1300);
        assert_eq!(stored.bytes_received, 700);
    }
}
