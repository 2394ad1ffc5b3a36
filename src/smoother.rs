//! Temporal smoothing
//!
//! Per-metric exponential moving average over landmark metrics, plus a short
//! rolling window of smoothed sets used to judge temporal stability.

use crate::config::{DEFAULT_RECENT_METRICS_CAPACITY, DEFAULT_SMOOTHING_ALPHA};
use crate::types::MetricSet;
use std::collections::VecDeque;

/// Streaming EMA smoother that retains exactly one smoothed metric set
#[derive(Debug, Clone)]
pub struct MetricSmoother {
    /// Weight of the newest frame (higher = more responsive)
    alpha: f64,
    /// Last smoothed value; `None` until the first frame
    previous: Option<MetricSet>,
    /// Most recent smoothed sets, oldest first
    recent: VecDeque<MetricSet>,
    recent_capacity: usize,
}

impl Default for MetricSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_ALPHA, DEFAULT_RECENT_METRICS_CAPACITY)
    }
}

impl MetricSmoother {
    pub fn new(alpha: f64, recent_capacity: usize) -> Self {
        Self {
            alpha,
            previous: None,
            recent: VecDeque::with_capacity(recent_capacity),
            recent_capacity,
        }
    }

    /// Smooth a raw metric set and make the result the retained state
    ///
    /// Formula: `smoothed = alpha * current + (1 - alpha) * previous`.
    /// On the first frame `previous` is the current value itself.
    pub fn smooth(&mut self, raw: &MetricSet) -> MetricSet {
        let previous = self.previous.unwrap_or(*raw);
        let alpha = self.alpha;
        let smoothed = raw.zip_with(&previous, |current, prev| {
            alpha * current + (1.0 - alpha) * prev
        });

        self.previous = Some(smoothed);
        self.recent.push_back(smoothed);
        while self.recent.len() > self.recent_capacity {
            self.recent.pop_front();
        }

        smoothed
    }

    /// Current retained smoothed set
    pub fn current(&self) -> Option<&MetricSet> {
        self.previous.as_ref()
    }

    /// Recent smoothed sets, oldest first
    pub fn recent(&self) -> &VecDeque<MetricSet> {
        &self.recent
    }

    /// Drop all retained state
    pub fn reset(&mut self) {
        self.previous = None;
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metric;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn uniform(value: f64) -> MetricSet {
        MetricSet {
            eyebrow_raise: value,
            smile_width: value,
            eye_openness: value,
            mouth_open: value,
            brow_furrow: value,
            mouth_corners_down: value,
        }
    }

    #[test]
    fn test_first_frame_passes_through() {
        let mut smoother = MetricSmoother::new(0.6, 5);
        let raw = uniform(0.8);
        assert_eq!(smoother.smooth(&raw), raw);
        assert_eq!(smoother.current(), Some(&raw));
    }

    #[test]
    fn test_ema_formula() {
        let mut smoother = MetricSmoother::new(0.6, 5);
        smoother.smooth(&uniform(1.0));
        let smoothed = smoother.smooth(&uniform(0.0));

        // 0.6 * 0.0 + 0.4 * 1.0
        assert!((smoothed.eye_openness - 0.4).abs() < 1e-9);

        let smoothed = smoother.smooth(&uniform(0.0));
        // 0.6 * 0.0 + 0.4 * 0.4
        assert!((smoothed.eye_openness - 0.16).abs() < 1e-9);
    }

    #[test]
    fn test_recent_window_rolls() {
        let mut smoother = MetricSmoother::new(0.5, 3);
        for i in 0..6 {
            smoother.smooth(&uniform(i as f64 / 10.0));
        }
        assert_eq!(smoother.recent().len(), 3);
    }

    #[test]
    fn test_reset_reseeds_from_next_frame() {
        let mut smoother = MetricSmoother::new(0.6, 5);
        smoother.smooth(&uniform(1.0));
        smoother.reset();
        assert!(smoother.current().is_none());
        assert!(smoother.recent().is_empty());

        let raw = uniform(0.2);
        assert_eq!(smoother.smooth(&raw), raw);
    }

    proptest! {
        #[test]
        fn prop_smoothed_lies_between_raw_and_previous(
            alpha in 0.01f64..0.99,
            frames in prop::collection::vec(prop::array::uniform6(0.0f64..=1.0), 1..30),
        ) {
            let mut smoother = MetricSmoother::new(alpha, 5);
            let mut previous: Option<MetricSet> = None;

            for values in frames {
                let raw = MetricSet {
                    eyebrow_raise: values[0],
                    smile_width: values[1],
                    eye_openness: values[2],
                    mouth_open: values[3],
                    brow_furrow: values[4],
                    mouth_corners_down: values[5],
                };
                let smoothed = smoother.smooth(&raw);

                for metric in Metric::ALL {
                    let value = smoothed.get(metric);
                    let current = raw.get(metric);
                    let prev = previous.map(|p| p.get(metric)).unwrap_or(current);
                    let lo = current.min(prev) - 1e-12;
                    let hi = current.max(prev) + 1e-12;
                    prop_assert!(value >= lo && value <= hi);
                }
                previous = Some(smoothed);
            }
        }
    }
}
