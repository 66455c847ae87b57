//! # Core Engine Module
//!
//! The synchronous building blocks of the telemetry client. None of these
//! components own a timer or a socket: the connection manager drives them from
//! its event loop, so every mutation happens inside a single callback.
//!
//! ## Core Components:
//!
//! - **`backoff`**: Exponential reconnect delay with jitter.
//! - **`cache`**: Per-entity snapshot store with insertion-order eviction and
//!   lazy age expiry.
//! - **`window`**: Per-entity rolling sample windows and mean smoothing.
//! - **`trend`**: Least-squares trend lines over a window.
//! - **`alerts`**: Reactive and predictive threshold checks.
//! - **`performance`**: Self-monitoring of processing time, ack latency and
//!   message rate.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Exponential backoff with jitter.
pub mod backoff;
/// The bounded snapshot cache.
pub mod cache;
/// Rolling sample windows and the aggregation tick.
pub mod window;
/// Linear regression over sample windows.
pub mod trend;
/// Threshold alerting.
pub mod alerts;
/// Client self-monitoring.
pub mod performance;

// --- Public API Re-exports ---
pub use alerts::{Alert, AlertType, Thresholds};
pub use backoff::BackoffPolicy;
pub use cache::{CacheMetrics, Snapshot, TelemetryCache};
pub use performance::{PerformanceMetrics, PerformanceMonitor, PerformanceReport};
pub use trend::Trendline;
pub use window::{Sample, SampleBuffers, SmoothedMetrics, SmoothedRecord};
