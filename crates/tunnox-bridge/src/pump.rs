//! `CopyWithControl`: the byte pump that moves data between a bridge's
//! source and target forwarders under rate-limit and quota control.
//!
//! One instance runs per direction, as its own task. The source->target
//! direction re-resolves its *reader* on every restart (so a mid-stream
//! `set_source_connection` swap is picked up once the old source's read
//! returns EOF); the target->source direction instead re-resolves its
//! *writer* on every single write, since the source side is the one
//! that can be replaced out from under a long-lived read loop.

use tracing::debug;

use crate::bridge::Bridge;
use crate::counters::CounterHandle;

const COPY_BUFFER_BYTES: usize = 32 * 1024;
const CONTEXT_CHECK_INTERVAL: u32 = 128;
const BATCH_UPDATE_THRESHOLD: u64 = 64 * 1024;
const QUOTA_REEVAL_BYTES: u64 = 1024 * 1024;
const QUOTA_HARD_CUTOFF_PERCENTAGE: f64 = 120.0;
const DEFAULT_THROTTLE_RATE_BYTES_PER_SEC: u64 = 100 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SourceToTarget,
    TargetToSource,
}

fn should_hard_cutoff(percentage: f64) -> bool {
    percentage >= QUOTA_HARD_CUTOFF_PERCENTAGE
}

fn is_continuable(err: &std::io::Error) -> bool {
    // Mirrors a peer that's merely idle: a read timeout or a transient
    // "try again" condition, neither of which should end the pump.
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}

pub async fn run(bridge: &Bridge, direction: Direction) {
    let counter: CounterHandle = match direction {
        Direction::SourceToTarget => bridge.bytes_sent_handle(),
        Direction::TargetToSource => bridge.bytes_received_handle(),
    };

    'restart: loop {
        let reader = match direction {
            Direction::SourceToTarget => bridge.source_forwarder().await,
            Direction::TargetToSource => bridge.target_forwarder().await,
        };
        let Some(reader) = reader else {
            break 'restart;
        };

        let mut buf = vec![0u8; COPY_BUFFER_BYTES];
        let mut iterations: u32 = 0;
        let mut batch: u64 = 0;
        let mut since_quota_check: u64 = 0;

        loop {
            iterations = iterations.wrapping_add(1);
            if iterations % CONTEXT_CHECK_INTERVAL == 0 && bridge.cancel.is_cancelled() {
                counter.add(batch);
                return;
            }

            let nr = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if is_continuable(&e) => continue,
                Err(_) => {
                    counter.add(batch);
                    let _ = bridge.close().await;
                    return;
                }
            };

            if let Some(limiter) = bridge.limiter().await {
                if limiter.wait_n(nr as u64, &bridge.cancel).await.is_err() {
                    counter.add(batch);
                    let _ = bridge.close().await;
                    return;
                }
            }

            let writer = match direction {
                Direction::SourceToTarget => bridge.target_forwarder().await,
                Direction::TargetToSource => bridge.source_forwarder().await,
            };
            let Some(writer) = writer else {
                counter.add(batch);
                let _ = bridge.close().await;
                return;
            };

            let nw = match writer.write(&buf[..nr]).await {
                Ok(nw) => nw,
                Err(_) => {
                    counter.add(batch);
                    let _ = bridge.close().await;
                    return;
                }
            };
            if nw < nr {
                counter.add(batch);
                let _ = bridge.close().await;
                return;
            }

            batch += nw as u64;
            since_quota_check += nw as u64;

            if batch >= BATCH_UPDATE_THRESHOLD {
                counter.add(batch);
                batch = 0;
            }

            if since_quota_check >= QUOTA_REEVAL_BYTES {
                since_quota_check = 0;
                if let Some(qc) = &bridge.quota_controller {
                    let used = bridge.bytes_sent() + bridge.bytes_received();
                    let status = qc.evaluate(&bridge.tunnel_id, used).await;
                    if should_hard_cutoff(status.percentage) {
                        counter.add(batch);
                        batch = 0;
                        debug!(tunnel_id = bridge.tunnel_id.as_str(), percentage = status.percentage, "quota hard cutoff");
                        let _ = bridge.close().await;
                        return;
                    } else if status.throttled {
                        let rate = status.current_rate_bytes_per_sec.unwrap_or(DEFAULT_THROTTLE_RATE_BYTES_PER_SEC);
                        bridge.ensure_throttled(rate).await;
                    }
                }
            }
        }

        counter.add(batch);

        if direction == Direction::TargetToSource {
            break 'restart;
        }
        if bridge.cancel.is_cancelled() {
            break 'restart;
        }
        if bridge.source_forwarder().await.is_none() {
            break 'restart;
        }
        // A new source was swapped in while the old one hit EOF; loop
        // back and read from it instead of ending the pump. Yield first:
        // an already-EOF'd stream resolves read() synchronously, and
        // without a yield point here this restart loop would never give
        // a concurrent set_source_connection call a chance to land.
        tokio::task::yield_now().await;
    }

    let _ = bridge.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_cutoff_triggers_at_120_percent() {
        assert!(!should_hard_cutoff(119.9));
        assert!(should_hard_cutoff(120.0));
        assert!(should_hard_cutoff(150.0));
    }
}
