//! # Performance Monitor
//!
//! Tracks how the client itself is doing: time spent dispatching each inbound
//! update, acknowledgment round-trip latency and inbound message rate. Each
//! measurement history is bounded to the most recent `history_limit` values.
//! Metrics are derived on every reporting tick and never persisted.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use crate::core::alerts::{Alert, Thresholds};

pub const PROCESSING_TIME: &str = "processing_time";
pub const LATENCY: &str = "latency";
pub const MESSAGE_RATE: &str = "message_rate";

/// Per-component scores in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub processing_time: f64,
    pub latency: f64,
    pub message_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceScore {
    pub overall: f64,
    pub detailed: ScoreBreakdown,
}

/// Snapshot computed on each reporting tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Milliseconds.
    pub average_processing_time: f64,
    /// Milliseconds.
    pub average_latency: f64,
    /// Inbound messages per second since the previous tick.
    pub message_rate: f64,
    pub performance_score: PerformanceScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdReport {
    pub limits: std::collections::BTreeMap<String, f64>,
    pub violated: Vec<String>,
}

/// Detailed report emitted on demand as `performance_report`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub timestamp: String,
    pub metrics: PerformanceMetrics,
    pub thresholds: ThresholdReport,
    pub recommendations: Vec<String>,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    thresholds: Thresholds,
    history_limit: usize,
    processing_times: VecDeque<f64>,
    latencies: VecDeque<f64>,
    messages_since_tick: u64,
    last_tick: Instant,
    last_rate: f64,
}

impl PerformanceMonitor {
    pub fn new(thresholds: Thresholds, history_limit: usize) -> Self {
        Self {
            thresholds,
            history_limit: history_limit.max(1),
            processing_times: VecDeque::new(),
            latencies: VecDeque::new(),
            messages_since_tick: 0,
            last_tick: Instant::now(),
            last_rate: 0.0,
        }
    }

    /// Restarts rate accounting, e.g. when a connection is (re)established.
    pub fn start_tracking(&mut self, now: Instant) {
        self.last_tick = now;
        self.messages_since_tick = 0;
    }

    pub fn record_message(&mut self) {
        self.messages_since_tick += 1;
    }

    /// Records the dispatch time of one update.
    pub fn record_processing_time(&mut self, elapsed: Duration) -> Option<Alert> {
        let ms = elapsed.as_secs_f64() * 1000.0;
        push_bounded(&mut self.processing_times, ms, self.history_limit);
        self.thresholds.check(PROCESSING_TIME, ms, None)
    }

    /// Records one acknowledgment round trip.
    pub fn record_latency(&mut self, elapsed: Duration) -> Option<Alert> {
        let ms = elapsed.as_secs_f64() * 1000.0;
        push_bounded(&mut self.latencies, ms, self.history_limit);
        self.thresholds.check(LATENCY, ms, None)
    }

    /// Closes the current rate interval and returns the metrics plus any
    /// message-rate alert.
    pub fn tick(&mut self, now: Instant) -> (PerformanceMetrics, Option<Alert>) {
        let elapsed = now.saturating_duration_since(self.last_tick).as_secs_f64();
        self.last_rate = if elapsed > 0.0 {
            self.messages_since_tick as f64 / elapsed
        } else {
            0.0
        };
        self.messages_since_tick = 0;
        self.last_tick = now;

        let alert = self.thresholds.check(MESSAGE_RATE, self.last_rate, None);
        (self.metrics(), alert)
    }

    /// Metrics from the current histories and the last closed rate interval.
    pub fn metrics(&self) -> PerformanceMetrics {
        let detailed = ScoreBreakdown {
            processing_time: self.series_score(&self.processing_times, PROCESSING_TIME),
            latency: self.series_score(&self.latencies, LATENCY),
            message_rate: self.value_score(self.last_rate, MESSAGE_RATE),
        };
        let overall = (detailed.processing_time + detailed.latency + detailed.message_rate) / 3.0;
        PerformanceMetrics {
            average_processing_time: average(&self.processing_times),
            average_latency: average(&self.latencies),
            message_rate: self.last_rate,
            performance_score: PerformanceScore { overall, detailed },
        }
    }

    pub fn report(&self) -> PerformanceReport {
        let metrics = self.metrics();
        let observed = [
            (PROCESSING_TIME, metrics.average_processing_time),
            (LATENCY, metrics.average_latency),
            (MESSAGE_RATE, metrics.message_rate),
        ];
        let violated: Vec<String> = observed
            .iter()
            .filter(|(name, value)| self.thresholds.get(name).is_some_and(|limit| *value > limit))
            .map(|(name, _)| name.to_string())
            .collect();
        let recommendations = violated.iter().map(|name| recommendation(name)).collect();

        PerformanceReport {
            timestamp: Utc::now().to_rfc3339(),
            metrics,
            thresholds: ThresholdReport {
                limits: self.thresholds.as_map().clone(),
                violated,
            },
            recommendations,
        }
    }

    pub fn clear(&mut self) {
        self.processing_times.clear();
        self.latencies.clear();
        self.messages_since_tick = 0;
        self.last_rate = 0.0;
    }

    fn value_score(&self, value: f64, metric: &str) -> f64 {
        match self.thresholds.get(metric) {
            Some(limit) if limit > 0.0 => (100.0 - value / limit * 100.0).max(0.0),
            _ => 100.0,
        }
    }

    fn series_score(&self, series: &VecDeque<f64>, metric: &str) -> f64 {
        let avg_score = self.value_score(average(series), metric);
        let stability = (100.0 - variance(series) / 1000.0).max(0.0);
        avg_score * 0.7 + stability * 0.3
    }
}

fn recommendation(metric: &str) -> String {
    match metric {
        PROCESSING_TIME => "Update handling is slow; reduce tracked metrics or sink work per update".to_string(),
        LATENCY => "Acknowledgment latency is high; check network path to the telemetry server".to_string(),
        MESSAGE_RATE => "Inbound message rate is high; subscribe to fewer entities".to_string(),
        other => format!("Investigate {}", other),
    }
}

fn push_bounded(series: &mut VecDeque<f64>, value: f64, limit: usize) {
    series.push_back(value);
    while series.len() > limit {
        series.pop_front();
    }
}

fn average(series: &VecDeque<f64>) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    series.iter().sum::<f64>() / series.len() as f64
}

fn variance(series: &VecDeque<f64>) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let mean = average(series);
    series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / series.len() as f64
}
