//! # Windowed Sample Buffers and Smoothing
//!
//! Each entity keeps an ordered run of timestamped samples. After every append
//! the run is trimmed so that all retained entries fall inside the trailing
//! window measured from the append time. The aggregation tick averages every
//! tracked field across an entity's buffer to produce one smoothed record.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::configs::TrackedMetric;

/// Metric name to numeric value.
pub type Sample = BTreeMap<String, f64>;

/// Smoothed output of one aggregation tick for one entity.
pub type SmoothedMetrics = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct TimedSample {
    pub timestamp: Instant,
    pub sample: Sample,
}

/// One `{entityId, smoothedMetrics}` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmoothedRecord {
    pub entity_id: String,
    pub smoothed_metrics: SmoothedMetrics,
}

/// Pulls the tracked numeric fields out of an update payload.
///
/// Fields that are missing or not numeric are left out of the sample.
pub fn extract_sample(payload: &Value, tracked: &[TrackedMetric]) -> Sample {
    tracked
        .iter()
        .filter_map(|metric| {
            payload
                .pointer(&metric.pointer)
                .and_then(Value::as_f64)
                .map(|v| (metric.name.clone(), v))
        })
        .collect()
}

/// Per-entity rolling windows.
#[derive(Debug)]
pub struct SampleBuffers {
    buffers: HashMap<String, VecDeque<TimedSample>>,
    window: Duration,
}

impl SampleBuffers {
    pub fn new(window: Duration) -> Self {
        Self {
            buffers: HashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Pushes a sample and trims entries older than `timestamp - window`.
    pub fn append(&mut self, entity_id: &str, timestamp: Instant, sample: Sample) {
        let buffer = self.buffers.entry(entity_id.to_string()).or_default();
        buffer.push_back(TimedSample { timestamp, sample });
        trim(buffer, timestamp, self.window);
    }

    /// Trims every buffer relative to `now`.
    pub fn prune(&mut self, now: Instant) {
        for buffer in self.buffers.values_mut() {
            trim(buffer, now, self.window);
        }
    }

    pub fn samples(&self, entity_id: &str) -> Option<&VecDeque<TimedSample>> {
        self.buffers.get(entity_id)
    }

    pub fn len(&self, entity_id: &str) -> usize {
        self.buffers.get(entity_id).map_or(0, VecDeque::len)
    }

    /// Entities with at least one buffered sample, in id order.
    pub fn non_empty(&self) -> impl Iterator<Item = (&String, &VecDeque<TimedSample>)> {
        let mut entries: Vec<_> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| !buffer.is_empty())
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

fn trim(buffer: &mut VecDeque<TimedSample>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while buffer.front().is_some_and(|entry| entry.timestamp < cutoff) {
        buffer.pop_front();
    }
}

/// Arithmetic mean of each field over the samples that carry it.
pub fn smooth<'a, I>(samples: I) -> SmoothedMetrics
where
    I: IntoIterator<Item = &'a TimedSample>,
{
    let mut sums: BTreeMap<String, (f64, u32)> = BTreeMap::new();
    for entry in samples {
        for (name, value) in &entry.sample {
            let slot = sums.entry(name.clone()).or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(name, (sum, count))| (name, sum / count as f64))
        .collect()
}

/// Runs one aggregation tick: prunes to `now`, then smooths every non-empty buffer.
pub fn aggregate(buffers: &mut SampleBuffers, now: Instant) -> Vec<SmoothedRecord> {
    buffers.prune(now);
    buffers
        .non_empty()
        .map(|(entity_id, buffer)| SmoothedRecord {
            entity_id: entity_id.clone(),
            smoothed_metrics: smooth(buffer),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(pairs: &[(&str, f64)]) -> Sample {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn append_keeps_only_window() {
        let window = Duration::from_secs(10);
        let mut buffers = SampleBuffers::new(window);
        let t0 = Instant::now() + Duration::from_secs(60);
        for s in 0..30u64 {
            let t = t0 + Duration::from_secs(s);
            buffers.append("enc-1", t, sample(&[("bitrate", s as f64)]));
            for entry in buffers.samples("enc-1").unwrap() {
                assert!(t.duration_since(entry.timestamp) <= window);
            }
        }
        assert_eq!(buffers.len("enc-1"), 11);
    }

    #[test]
    fn mean_of_buffered_bitrates() {
        let mut buffers = SampleBuffers::new(Duration::from_secs(10));
        let t0 = Instant::now();
        for v in [10.0, 20.0, 30.0] {
            buffers.append("enc-1", t0, sample(&[("bitrate", v)]));
        }
        let records = aggregate(&mut buffers, t0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_id, "enc-1");
        assert_eq!(records[0].smoothed_metrics["bitrate"], 20.0);
    }

    #[test]
    fn missing_fields_average_over_present_samples() {
        let t0 = Instant::now();
        let samples = vec![
            TimedSample { timestamp: t0, sample: sample(&[("bitrate", 100.0), ("latency", 40.0)]) },
            TimedSample { timestamp: t0, sample: sample(&[("bitrate", 300.0)]) },
        ];
        let smoothed = smooth(&samples);
        assert_eq!(smoothed["bitrate"], 200.0);
        assert_eq!(smoothed["latency"], 40.0);
    }

    #[test]
    fn drained_entities_are_skipped() {
        let mut buffers = SampleBuffers::new(Duration::from_secs(10));
        let t0 = Instant::now();
        buffers.append("stale", t0, sample(&[("bitrate", 1.0)]));
        buffers.append("live", t0 + Duration::from_secs(20), sample(&[("bitrate", 2.0)]));

        let records = aggregate(&mut buffers, t0 + Duration::from_secs(20));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_id, "live");
    }

    #[test]
    fn extracts_tracked_fields_by_pointer() {
        let tracked = vec![
            TrackedMetric::new("bitrate", "/streaming/bitrate"),
            TrackedMetric::new("latency", "/network/latency"),
            TrackedMetric::new("packet_loss", "/network/packet_loss"),
        ];
        let payload = json!({
            "encoder_id": "enc-1",
            "streaming": { "bitrate": 4500 },
            "network": { "latency": 12.5, "packet_loss": "n/a" }
        });
        let s = extract_sample(&payload, &tracked);
        assert_eq!(s.get("bitrate"), Some(&4500.0));
        assert_eq!(s.get("latency"), Some(&12.5));
        assert!(!s.contains_key("packet_loss"));
    }
}
