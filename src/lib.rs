//! Library root for the `flametree-telemetry` crate
//!
//! Request-scoped structured logging, sliding-window rate limiting, request
//! middleware, and log retention for the Flametree coffee server.

// Core error handling
pub mod errors;

// Configuration
pub mod config;

// Logging
pub mod logger;
pub mod operation;
pub mod export;

// Request protections & middleware
pub mod rate_limiter;
pub mod middleware;

// Retention & data safety net
pub mod retention;
pub mod data_guard;

// Web server interface
pub mod app_state;
pub mod server;

pub use app_state::AppState;
pub use config::TelemetryConfig;
pub use errors::{TelemetryError, TelemetryResult};
pub use logger::{LogLevel, StructuredLogger};
pub use operation::OperationLogger;
pub use rate_limiter::RateLimiter;
pub use retention::LogRetentionScheduler;
