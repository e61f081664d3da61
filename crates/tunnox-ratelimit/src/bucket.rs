//! Token bucket rate limiter: `rate` bytes/s replenishment, burst
//! capacity fixed at twice the rate.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often a blocked waiter re-checks the bucket absent a rate-change
/// notification. Small enough that byte-level limiters stay responsive.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("cancelled")]
    Cancelled,
}

struct Inner {
    tokens: f64,
    rate: f64,
    capacity: f64,
    last_refill: Instant,
}

impl Inner {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// A cancellable, dynamically retunable byte-rate limiter.
pub struct TokenBucket {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl TokenBucket {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        let rate = rate_bytes_per_sec as f64;
        Self {
            inner: Mutex::new(Inner {
                tokens: rate * 2.0,
                rate,
                capacity: rate * 2.0,
                last_refill: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    /// Re-tunes the limiter's rate (and burst, which always tracks
    /// `2x rate`) in place — used for dynamic throttling when a quota
    /// controller reports a lower ceiling mid-transfer. Wakes anyone
    /// already blocked in [`Self::wait_n`] so they re-evaluate against
    /// the new rate immediately.
    pub async fn set_rate(&self, rate_bytes_per_sec: u64) {
        let rate = rate_bytes_per_sec as f64;
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.refill(now);
        inner.rate = rate;
        inner.capacity = rate * 2.0;
        inner.tokens = inner.tokens.min(inner.capacity);
        drop(inner);
        debug!(rate_bytes_per_sec = rate_bytes_per_sec, "rate limiter retuned");
        self.notify.notify_waiters();
    }

    /// Blocks until `n` bytes worth of tokens are available or
    /// `cancel` fires, whichever comes first. A request larger than the
    /// bucket's own burst capacity can never be fully granted — `tokens`
    /// never refills past `capacity` — so it is clamped to `capacity`
    /// and spends the whole bucket instead of blocking forever.
    pub async fn wait_n(&self, n: u64, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        let need = n as f64;
        loop {
            {
                let mut inner = self.inner.lock().await;
                inner.refill(Instant::now());
                let need = need.min(inner.capacity);
                if inner.tokens >= need {
                    inner.tokens -= need;
                    return Ok(());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_immediately_within_burst() {
        let bucket = TokenBucket::new(1000);
        let cancel = CancellationToken::new();
        bucket.wait_n(1500, &cancel).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_refill_then_grants() {
        let bucket = TokenBucket::new(1000);
        let cancel = CancellationToken::new();
        bucket.wait_n(2000, &cancel).await.unwrap();

        let cancel2 = cancel.clone();
        let waiter = tokio::spawn(async move { bucket.wait_n(500, &cancel2).await });

        tokio::time::advance(Duration::from_millis(600)).await;
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn request_larger_than_capacity_spends_the_whole_bucket_instead_of_hanging() {
        // capacity is 2x rate = 2000; draining it first forces the next
        // call to actually wait for a refill rather than being granted
        // from the initial full bucket.
        let bucket = TokenBucket::new(1000);
        let cancel = CancellationToken::new();
        bucket.wait_n(2000, &cancel).await.unwrap();

        // A 32 KiB pump chunk asks for far more than this bucket can
        // ever hold; without clamping, `tokens >= need` would never be
        // true and this would hang until cancelled.
        let cancel2 = cancel.clone();
        let waiter = tokio::spawn(async move { bucket.wait_n(32 * 1024, &cancel2).await });

        tokio::time::advance(Duration::from_secs(2)).await;
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let bucket = TokenBucket::new(10);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let waiter = tokio::spawn(async move { bucket.wait_n(10_000, &cancel2).await });
        cancel.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(RateLimitError::Cancelled)));
    }
}
