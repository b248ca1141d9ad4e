//! Request rate limiting for backend calls.
//!
//! Fixed-rate sliding window: at most N requests are started within any one
//! second window.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BackendError;

const WINDOW: Duration = Duration::from_secs(1);

/// Configuration for the request throttler.
#[derive(Debug, Clone)]
pub struct ThrottlerConfig {
    /// Maximum requests started per second
    pub max_requests_per_second: u32,
    /// Whether throttling is enabled
    pub enabled: bool,
}

/// Current throttle statistics.
#[derive(Debug, Clone, Default)]
pub struct ThrottleStats {
    pub requests_last_second: usize,
    pub max_requests_per_second: u32,
    pub is_throttled: bool,
}

/// Sliding window request throttler.
pub struct RequestThrottler {
    /// Start times of recent requests, oldest first
    started: Mutex<VecDeque<Instant>>,
    config: ThrottlerConfig,
}

impl RequestThrottler {
    pub fn new(config: ThrottlerConfig) -> Self {
        Self {
            started: Mutex::new(VecDeque::new()),
            config,
        }
    }

    fn prune_old_entries(started: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = started.front() {
            if now.duration_since(*front) >= WINDOW {
                started.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take a permit if one is free right now.
    /// Returns Err(wait_duration) if the window is full.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        if !self.config.enabled || self.config.max_requests_per_second == 0 {
            return Ok(());
        }

        let mut started = self.started.lock().await;
        let now = Instant::now();
        Self::prune_old_entries(&mut started, now);

        if started.len() < self.config.max_requests_per_second as usize {
            started.push_back(now);
            return Ok(());
        }

        // Window is full: the oldest entry decides when a slot frees up
        let wait = started
            .front()
            .map(|oldest| (*oldest + WINDOW).saturating_duration_since(now))
            .unwrap_or(WINDOW);
        Err(wait)
    }

    /// Wait for a permit, giving up if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), BackendError> {
        loop {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            match self.try_acquire().await {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    let stats = self.get_stats().await;
                    debug!(
                        "Backend throttled ({}/{} requests in the last second), waiting {}ms",
                        stats.requests_last_second,
                        stats.max_requests_per_second,
                        wait.as_millis()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                    }
                }
            }
        }
    }

    pub async fn get_stats(&self) -> ThrottleStats {
        let mut started = self.started.lock().await;
        Self::prune_old_entries(&mut started, Instant::now());
        ThrottleStats {
            requests_last_second: started.len(),
            max_requests_per_second: self.config.max_requests_per_second,
            is_throttled: self.config.enabled
                && started.len() >= self.config.max_requests_per_second as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttler(rps: u32) -> RequestThrottler {
        RequestThrottler::new(ThrottlerConfig {
            max_requests_per_second: rps,
            enabled: true,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_limit_then_throttles() {
        let throttler = throttler(3);

        for _ in 0..3 {
            assert!(throttler.try_acquire().await.is_ok());
        }
        let wait = throttler.try_acquire().await.unwrap_err();
        assert!(wait <= WINDOW);
        assert!(throttler.get_stats().await.is_throttled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let throttler = throttler(2);
        throttler.try_acquire().await.unwrap();
        throttler.try_acquire().await.unwrap();
        assert!(throttler.try_acquire().await.is_err());

        tokio::time::advance(Duration::from_millis(1001)).await;

        assert!(throttler.try_acquire().await.is_ok());
        assert_eq!(throttler.get_stats().await.requests_last_second, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_free_slot() {
        let throttler = throttler(1);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        throttler.acquire(&cancel).await.unwrap();
        throttler.acquire(&cancel).await.unwrap();

        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancelled_while_waiting() {
        let throttler = throttler(1);
        let cancel = CancellationToken::new();
        throttler.acquire(&cancel).await.unwrap();

        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            child.cancel();
        });

        let result = throttler.acquire(&cancel).await;
        assert!(matches!(result, Err(BackendError::Cancelled)));
    }

    #[tokio::test]
    async fn test_disabled_never_throttles() {
        let throttler = RequestThrottler::new(ThrottlerConfig {
            max_requests_per_second: 1,
            enabled: false,
        });
        for _ in 0..10 {
            assert!(throttler.try_acquire().await.is_ok());
        }
    }
}
