//! Exponential-backoff reconnection policy for the client-side control
//! connection.
//!
//! A `Bridge`'s `set_source_connection` can be called again at any
//! point mid-stream (the dynamic-writer wrapper re-resolves the
//! current source forwarder on every write); this manager is what
//! drives those repeated calls on a real reconnect.

use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconnectError {
    #[error("max reconnection attempts reached")]
    MaxAttemptsReached,
}

pub struct ReconnectManager {
    config: ReconnectConfig,
    current_backoff: Duration,
    attempt: usize,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_backoff: config.initial_backoff,
            config,
            attempt: 0,
        }
    }

    pub async fn wait(&mut self) -> Result<(), ReconnectError> {
        self.attempt += 1;
        if let Some(max_attempts) = self.config.max_attempts {
            if self.attempt > max_attempts {
                return Err(ReconnectError::MaxAttemptsReached);
            }
        }

        debug!(backoff_secs = self.current_backoff.as_secs(), attempt = self.attempt, "backing off before reconnect");
        sleep(self.current_backoff).await;

        let next = Duration::from_secs_f64(self.current_backoff.as_secs_f64() * self.config.multiplier);
        self.current_backoff = next.min(self.config.max_backoff);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_backoff = self.config.initial_backoff;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> ReconnectConfig {
        ReconnectConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    #[tokio::test]
    async fn backoff_doubles_up_to_the_cap() {
        let mut manager = ReconnectManager::new(fast_config());

        manager.wait().await.unwrap();
        assert_eq!(manager.current_backoff(), Duration::from_millis(20));
        manager.wait().await.unwrap();
        assert_eq!(manager.current_backoff(), Duration::from_millis(40));
        manager.wait().await.unwrap();
        assert_eq!(manager.current_backoff(), Duration::from_millis(80));
        manager.wait().await.unwrap();
        assert_eq!(manager.current_backoff(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn reset_restores_initial_backoff() {
        let mut manager = ReconnectManager::new(fast_config());
        manager.wait().await.unwrap();
        manager.wait().await.unwrap();
        manager.reset();
        assert_eq!(manager.attempt(), 0);
        assert_eq!(manager.current_backoff(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn max_attempts_is_enforced() {
        let mut config = fast_config();
        config.max_attempts = Some(2);
        let mut manager = ReconnectManager::new(config);

        manager.wait().await.unwrap();
        manager.wait().await.unwrap();
        assert!(matches!(manager.wait().await, Err(ReconnectError::MaxAttemptsReached)));
    }
}
