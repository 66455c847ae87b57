//! # Client Configuration
//!
//! All tunables of the telemetry client, deserializable from JSON with
//! camelCase keys. Every section falls back to its defaults when omitted, so a
//! config file only needs to name what it overrides.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Reconnection and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter_factor: f64,
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            jitter_factor: 0.1,
            connect_timeout_ms: 20_000,
        }
    }
}

/// Cooldown applied when the upstream reports rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Snapshot cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub max_age_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_age_ms: 5000,
        }
    }
}

/// Sample window and smoothing cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowConfig {
    pub window_ms: u64,
    pub aggregation_interval_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_ms: 10_000,
            aggregation_interval_ms: 1000,
        }
    }
}

/// Trend analysis cadence and projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrendConfig {
    pub interval_ms: u64,
    pub min_samples: usize,
    /// Look-ahead, in samples past the newest one.
    pub horizon: u32,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            min_samples: 5,
            horizon: 5,
        }
    }
}

/// A numeric field extracted from entity updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedMetric {
    pub name: String,
    /// JSON pointer into the update payload, e.g. `/network/latency`.
    pub pointer: String,
}

impl TrackedMetric {
    pub fn new(name: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pointer: pointer.into(),
        }
    }
}

fn default_tracked() -> Vec<TrackedMetric> {
    vec![
        TrackedMetric::new("bitrate", "/streaming/bitrate"),
        TrackedMetric::new("latency", "/network/latency"),
        TrackedMetric::new("packet_loss", "/network/packet_loss"),
    ]
}

fn default_thresholds() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("latency".to_string(), 200.0),
        ("message_rate".to_string(), 100.0),
        ("processing_time".to_string(), 50.0),
    ])
}

/// Top-level configuration of a telemetry client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Entity kind used to derive event names (`<kind>_update`, `subscribe_<kind>`).
    pub entity_kind: String,
    pub reconnect: ReconnectConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub window: WindowConfig,
    pub trend: TrendConfig,
    /// Upper bounds per metric name; breaching one raises an alert.
    pub thresholds: BTreeMap<String, f64>,
    pub tracked: Vec<TrackedMetric>,
    pub ack_timeout_ms: u64,
    pub queue_retention_ms: u64,
    pub report_interval_ms: u64,
    /// Number of measurements kept by the performance monitor.
    pub history_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            entity_kind: "encoder".to_string(),
            reconnect: ReconnectConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            window: WindowConfig::default(),
            trend: TrendConfig::default(),
            thresholds: default_thresholds(),
            tracked: default_tracked(),
            ack_timeout_ms: 5000,
            queue_retention_ms: 300_000,
            report_interval_ms: 5000,
            history_limit: 100,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: ClientConfig =
            serde_json::from_str(raw).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ClientError::Config(msg.to_string()));

        if self.entity_kind.trim().is_empty() {
            return invalid("entityKind must not be empty");
        }
        if self.cache.capacity == 0 {
            return invalid("cache.capacity must be at least 1");
        }
        if self.reconnect.max_attempts == 0 {
            return invalid("reconnect.maxAttempts must be at least 1");
        }
        if !self.reconnect.jitter_factor.is_finite() || self.reconnect.jitter_factor < 0.0 {
            return invalid("reconnect.jitterFactor must be a finite, non-negative number");
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return invalid("reconnect.maxDelayMs must not be below reconnect.baseDelayMs");
        }
        let periods = [
            ("window.windowMs", self.window.window_ms),
            ("window.aggregationIntervalMs", self.window.aggregation_interval_ms),
            ("trend.intervalMs", self.trend.interval_ms),
            ("reportIntervalMs", self.report_interval_ms),
            ("ackTimeoutMs", self.ack_timeout_ms),
            ("reconnect.connectTimeoutMs", self.reconnect.connect_timeout_ms),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, v)| *v == 0) {
            return Err(ClientError::Config(format!("{} must be greater than zero", name)));
        }
        if self.trend.min_samples < 2 {
            return invalid("trend.minSamples must be at least 2");
        }
        if self.history_limit == 0 {
            return invalid("historyLimit must be at least 1");
        }
        Ok(())
    }

    /// Event carrying entity metric updates.
    pub fn update_event(&self) -> String {
        format!("{}_update", self.entity_kind)
    }

    /// Event carrying entity state transitions.
    pub fn state_change_event(&self) -> String {
        format!("{}_state_change", self.entity_kind)
    }

    /// Event carrying upstream-raised entity alerts.
    pub fn alert_event(&self) -> String {
        format!("{}_alert", self.entity_kind)
    }

    /// Outbound acknowledged subscribe request.
    pub fn subscribe_event(&self) -> String {
        format!("subscribe_{}", self.entity_kind)
    }

    /// Payload field holding the entity id.
    pub fn id_field(&self) -> String {
        format!("{}_id", self.entity_kind)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn queue_retention(&self) -> Duration {
        Duration::from_millis(self.queue_retention_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect.connect_timeout_ms)
    }

    pub fn threshold(&self, metric: &str) -> Option<f64> {
        self.thresholds.get(metric).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.update_event(), "encoder_update");
        assert_eq!(config.subscribe_event(), "subscribe_encoder");
        assert_eq!(config.id_field(), "encoder_id");
        assert_eq!(config.threshold("latency"), Some(200.0));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{ "entityKind": "camera", "cache": { "capacity": 3 }, "reconnect": { "maxAttempts": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.entity_kind, "camera");
        assert_eq!(config.cache.capacity, 3);
        assert_eq!(config.cache.max_age_ms, 5000);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.tracked.len(), 3);
    }

    #[test]
    fn rejects_zero_capacity_and_periods() {
        let mut config = ClientConfig::default();
        config.cache.capacity = 0;
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let mut config = ClientConfig::default();
        config.window.aggregation_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("aggregationIntervalMs"));

        let mut config = ClientConfig::default();
        config.reconnect.jitter_factor = f64::NAN;
        assert!(config.validate().is_err());
    }
}
