//! Shared service instances for request handling
//!
//! The logger and rate limiter are constructed once at startup and passed by
//! reference; there is no lazy global.

use std::sync::Arc;

use crate::config::TelemetryConfig;
use crate::logger::StructuredLogger;
use crate::rate_limiter::RateLimiter;

pub struct AppState {
    pub config: TelemetryConfig,
    pub logger: Arc<StructuredLogger>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: TelemetryConfig) -> Arc<Self> {
        let logger = Arc::new(StructuredLogger::new(&config));
        let limiter = RateLimiter::new(
            logger.clone(),
            config.rate_limit_max_requests,
            config.rate_limit_window_ms,
        );

        Arc::new(Self {
            config,
            logger,
            limiter,
        })
    }
}
