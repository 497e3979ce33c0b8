//! Sliding-window rate limiting for inbound requests
//!
//! Per-identifier request timestamps are kept in memory for the trailing
//! window; nothing survives a restart. The write lock serializes the
//! check-then-record sequence, so the cap holds under concurrent load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::json;
use tokio::sync::RwLock;

use crate::logger::StructuredLogger;

/// Fraction of admitted calls that trigger a full stale-identifier sweep.
const CLEANUP_PROBABILITY: f64 = 0.01;

/// Sliding-window limiter deciding admit/reject per identifier.
pub struct RateLimiter {
    logger: Arc<StructuredLogger>,
    requests: RwLock<HashMap<String, Vec<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(logger: Arc<StructuredLogger>, max_requests: usize, window_ms: u64) -> Self {
        Self {
            logger,
            requests: RwLock::new(HashMap::new()),
            max_requests,
            window: Duration::from_millis(window_ms),
        }
    }

    /// Check whether a request from `identifier` is admitted. A rejected
    /// attempt is not recorded against the window.
    pub async fn is_allowed(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        let entry = requests.entry(identifier.to_string()).or_default();
        entry.retain(|&time| now.duration_since(time) < self.window);

        if entry.len() >= self.max_requests {
            self.logger.warn(
                "Request rate limit triggered",
                Some(json!({
                    "module": "RateLimiter",
                    "identifier": identifier,
                    "requestCount": entry.len(),
                    "limit": self.max_requests,
                })),
            );
            return false;
        }

        entry.push(now);

        // Amortized maintenance: a small fraction of calls sweep out
        // identifiers whose entire window has lapsed.
        if rand::rng().random::<f64>() < CLEANUP_PROBABILITY {
            let remaining = sweep(&mut requests, now, self.window);
            self.logger.debug(
                "Rate limiter sweep finished",
                Some(json!({
                    "module": "RateLimiter",
                    "remainingIdentifiers": remaining,
                })),
            );
        }

        true
    }

    /// Deterministic variant of the probabilistic sweep, for callers that
    /// want a predictable memory bound.
    pub async fn cleanup_expired(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        sweep(&mut requests, now, self.window);
    }

    /// Snapshot of limiter occupancy.
    pub async fn stats(&self) -> RateLimiterStats {
        let requests = self.requests.read().await;
        let now = Instant::now();

        let mut total_identifiers = 0;
        let mut active_identifiers = 0;
        let mut active_requests = 0;

        for timestamps in requests.values() {
            let in_window = timestamps
                .iter()
                .filter(|&&time| now.duration_since(time) < self.window)
                .count();

            if in_window > 0 {
                active_identifiers += 1;
                active_requests += in_window;
            }
            total_identifiers += 1;
        }

        RateLimiterStats {
            total_identifiers,
            active_identifiers,
            active_requests,
            max_requests: self.max_requests,
            window: self.window,
        }
    }
}

fn sweep(
    requests: &mut HashMap<String, Vec<Instant>>,
    now: Instant,
    window: Duration,
) -> usize {
    for timestamps in requests.values_mut() {
        timestamps.retain(|&time| now.duration_since(time) < window);
    }
    requests.retain(|_, timestamps| !timestamps.is_empty());
    requests.len()
}

/// Statistics for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_identifiers: usize,
    pub active_identifiers: usize,
    pub active_requests: usize,
    pub max_requests: usize,
    pub window: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use tokio::time::sleep;

    fn quiet_logger() -> Arc<StructuredLogger> {
        Arc::new(StructuredLogger::with_settings(
            LogLevel::Fatal,
            "logs",
            false,
            false,
        ))
    }

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(quiet_logger(), 3, 1000);

        // First 3 requests should succeed
        assert!(limiter.is_allowed("client1").await);
        assert!(limiter.is_allowed("client1").await);
        assert!(limiter.is_allowed("client1").await);

        // 4th request should fail
        assert!(!limiter.is_allowed("client1").await);

        // Wait for window to expire
        sleep(Duration::from_millis(1100)).await;

        // Should succeed again
        assert!(limiter.is_allowed("client1").await);
    }

    #[tokio::test]
    async fn test_window_of_two_admits_exactly_two() {
        let limiter = RateLimiter::new(quiet_logger(), 2, 1000);

        let results = [
            limiter.is_allowed("ip1").await,
            limiter.is_allowed("ip1").await,
            limiter.is_allowed("ip1").await,
        ];
        assert_eq!(results, [true, true, false]);

        sleep(Duration::from_millis(1100)).await;
        assert!(limiter.is_allowed("ip1").await);
    }

    #[tokio::test]
    async fn test_rate_limiter_multiple_identifiers() {
        let limiter = RateLimiter::new(quiet_logger(), 2, 1000);

        assert!(limiter.is_allowed("client1").await);
        assert!(limiter.is_allowed("client1").await);
        assert!(!limiter.is_allowed("client1").await);

        // A different identifier has its own window
        assert!(limiter.is_allowed("client2").await);
        assert!(limiter.is_allowed("client2").await);
        assert!(!limiter.is_allowed("client2").await);
    }

    #[tokio::test]
    async fn test_rejected_attempt_is_not_recorded() {
        let limiter = RateLimiter::new(quiet_logger(), 1, 1000);

        assert!(limiter.is_allowed("client1").await);
        assert!(!limiter.is_allowed("client1").await);

        let stats = limiter.stats().await;
        assert_eq!(stats.active_requests, 1);
    }

    #[tokio::test]
    async fn test_cleanup_evicts_lapsed_identifiers() {
        let limiter = RateLimiter::new(quiet_logger(), 1, 200);

        assert!(limiter.is_allowed("client1").await);
        sleep(Duration::from_millis(250)).await;

        limiter.cleanup_expired().await;

        let stats = limiter.stats().await;
        assert_eq!(stats.total_identifiers, 0);
        assert_eq!(stats.active_identifiers, 0);
    }
}
