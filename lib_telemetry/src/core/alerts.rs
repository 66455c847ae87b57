//! # Threshold Alerting
//!
//! Static per-metric upper bounds. A *reactive* alert fires as soon as one
//! recorded value exceeds its bound; a *predictive* alert fires when a
//! trendline projected ahead would exceed it. There is no deduplication:
//! every breach observed on every tick produces a fresh alert.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::trend::Trendline;
use crate::core::window::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Reactive,
    Predictive,
}

/// Structured alert handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub metric: String,
    /// Observed value (reactive) or projected value (predictive).
    pub value: f64,
    pub threshold: f64,
    /// Entity the value belongs to; `None` for client-wide metrics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-metric upper bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thresholds {
    limits: BTreeMap<String, f64>,
}

impl Thresholds {
    pub fn new(limits: BTreeMap<String, f64>) -> Self {
        Self { limits }
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.limits.get(metric).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.limits.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.limits
    }

    /// Reactive check of a single value.
    pub fn check(&self, metric: &str, value: f64, entity_id: Option<&str>) -> Option<Alert> {
        let threshold = self.get(metric)?;
        (value > threshold).then(|| Alert {
            alert_type: AlertType::Reactive,
            metric: metric.to_string(),
            value,
            threshold,
            entity_id: entity_id.map(str::to_string),
            timestamp: Utc::now(),
        })
    }

    /// Reactive check of every thresholded field in a sample.
    pub fn check_sample(&self, entity_id: &str, sample: &Sample) -> Vec<Alert> {
        sample
            .iter()
            .filter_map(|(metric, value)| self.check(metric, *value, Some(entity_id)))
            .collect()
    }

    /// Predictive check: projects `line` `horizon` samples ahead.
    pub fn predict(
        &self,
        entity_id: &str,
        metric: &str,
        line: &Trendline,
        horizon: u32,
    ) -> Option<Alert> {
        let threshold = self.get(metric)?;
        let projected = line.project(horizon);
        (projected > threshold).then(|| Alert {
            alert_type: AlertType::Predictive,
            metric: metric.to_string(),
            value: projected,
            threshold,
            entity_id: Some(entity_id.to_string()),
            timestamp: Utc::now(),
        })
    }
}
