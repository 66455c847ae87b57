//! # Trend Analyzer
//!
//! Ordinary least squares over a buffer, with the sample *index* (not the
//! wall-clock time) as the independent variable. The fitted line is projected
//! a fixed number of samples ahead to raise predictive alerts before a
//! threshold is actually breached.

use std::collections::VecDeque;

use serde::Serialize;

use crate::core::window::TimedSample;

/// A fitted line `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trendline {
    pub slope: f64,
    pub intercept: f64,
    /// Number of points the line was fitted on.
    pub points: usize,
}

impl Trendline {
    pub fn value_at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// Value `horizon` samples past the newest fitted point.
    pub fn project(&self, horizon: u32) -> f64 {
        let last = self.points.saturating_sub(1) as f64;
        self.value_at(last + f64::from(horizon))
    }
}

/// Fits `values[i]` against `i`. Needs at least two points.
pub fn fit(values: &[f64]) -> Option<Trendline> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }

    let slope = sxy / sxx;
    Some(Trendline {
        slope,
        intercept: mean_y - slope * mean_x,
        points: n,
    })
}

/// Fits `metric` over a buffer, skipping samples that lack it.
///
/// Returns `None` when fewer than `min_samples` samples carry the metric.
pub fn analyze(buffer: &VecDeque<TimedSample>, metric: &str, min_samples: usize) -> Option<Trendline> {
    let values: Vec<f64> = buffer
        .iter()
        .filter_map(|entry| entry.sample.get(metric).copied())
        .collect();
    if values.len() < min_samples.max(2) {
        return None;
    }
    fit(&values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::window::Sample;
    use tokio::time::Instant;

    fn buffer(metric: &str, values: &[f64]) -> VecDeque<TimedSample> {
        let t0 = Instant::now();
        values
            .iter()
            .map(|v| TimedSample {
                timestamp: t0,
                sample: Sample::from([(metric.to_string(), *v)]),
            })
            .collect()
    }

    #[test]
    fn increasing_series_has_unit_slope() {
        let line = fit(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert!((line.slope - 1.0).abs() < 1e-12);
        assert!((line.intercept - 1.0).abs() < 1e-12);
        assert!((line.project(5) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn constant_series_has_zero_slope() {
        let line = fit(&[7.0; 6]).unwrap();
        assert_eq!(line.slope, 0.0);
        assert_eq!(line.intercept, 7.0);
    }

    #[test]
    fn needs_minimum_samples() {
        let short = buffer("latency", &[1.0, 2.0, 3.0, 4.0]);
        assert!(analyze(&short, "latency", 5).is_none());

        let enough = buffer("latency", &[10.0, 8.0, 6.0, 4.0, 2.0]);
        let line = analyze(&enough, "latency", 5).unwrap();
        assert!((line.slope + 2.0).abs() < 1e-12);
        assert!(analyze(&enough, "bitrate", 5).is_none());
    }

    #[test]
    fn single_point_cannot_be_fitted() {
        assert!(fit(&[3.0]).is_none());
        assert!(fit(&[]).is_none());
    }
}
