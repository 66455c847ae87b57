//! # Configuration Modules
//!
//! This module aggregates the configuration of the telemetry client. Values
//! are plain serde structs so binaries can layer them from files, environment
//! and command line before handing them to the client.

/// Tunables of the client core (reconnect, cache, window, trend, thresholds).
pub mod client_config;

pub use client_config::{
    CacheConfig, ClientConfig, RateLimitConfig, ReconnectConfig, TrackedMetric, TrendConfig,
    WindowConfig,
};
