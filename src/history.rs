//! Detection history and recency-weighted aggregation

use crate::config::{PipelineConfig, DEFAULT_HISTORY_CAPACITY};
use crate::types::{Detection, LearningState};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Weight of confidence in an entry's aggregation score
const CONFIDENCE_WEIGHT: f64 = 0.7;
/// Weight of recency in an entry's aggregation score
const RECENCY_WEIGHT: f64 = 0.3;

/// Bounded FIFO of accepted detections, oldest first
#[derive(Debug, Clone)]
pub struct DetectionHistory {
    capacity: usize,
    entries: VecDeque<Detection>,
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl DetectionHistory {
    /// `capacity` is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.history_capacity)
    }

    /// Append a detection, evicting the oldest entries beyond capacity
    pub fn push(&mut self, detection: Detection) {
        self.entries.push_back(detection);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&Detection> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dominant state over the trailing `window` ending at `now`
    ///
    /// Entries with `now - timestamp < window` that are not in the future
    /// form a time-ordered subsequence of length `n`. Entry `i` (0-based)
    /// contributes `0.7 * confidence + 0.3 * (i + 1) / n` to its state; the
    /// state with the largest sum wins, ties going to the state seen first.
    /// Returns `fallback` when no entry falls inside the window.
    pub fn dominant_recent_state(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        fallback: LearningState,
    ) -> LearningState {
        let recent: Vec<&Detection> = self
            .entries
            .iter()
            .filter(|d| d.timestamp <= now && now - d.timestamp < window)
            .collect();

        if recent.is_empty() {
            return fallback;
        }

        let n = recent.len() as f64;
        // Insertion-ordered so ties resolve to the first state encountered
        let mut totals: Vec<(LearningState, f64)> = Vec::with_capacity(LearningState::ALL.len());
        for (i, detection) in recent.iter().enumerate() {
            let score =
                CONFIDENCE_WEIGHT * detection.confidence + RECENCY_WEIGHT * (i as f64 + 1.0) / n;
            match totals.iter_mut().find(|(state, _)| *state == detection.state) {
                Some((_, total)) => *total += score,
                None => totals.push((detection.state, score)),
            }
        }

        strongest(&totals).unwrap_or(fallback)
    }
}

/// State with the largest total; earlier entries win ties
fn strongest(totals: &[(LearningState, f64)]) -> Option<LearningState> {
    let (first, rest) = totals.split_first()?;
    let mut best = *first;
    for &(state, total) in rest {
        if total > best.1 {
            best = (state, total);
        }
    }
    Some(best.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExpressionVector;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn detection(state: LearningState, confidence: f64, timestamp: DateTime<Utc>) -> Detection {
        Detection {
            state,
            confidence,
            expressions: ExpressionVector::default(),
            metrics: None,
            timestamp,
        }
    }

    fn window() -> Duration {
        Duration::seconds(30)
    }

    #[test]
    fn test_recency_weighted_aggregation() {
        let now = Utc::now();
        let mut history = DetectionHistory::default();
        history.push(detection(LearningState::Bored, 0.9, now - Duration::seconds(5)));
        history.push(detection(LearningState::Focused, 0.6, now - Duration::seconds(2)));

        // bored: 0.7 * 0.9 + 0.3 * 0.5 = 0.78; focused: 0.7 * 0.6 + 0.3 * 1.0 = 0.72
        assert_eq!(
            history.dominant_recent_state(now, window(), LearningState::Focused),
            LearningState::Bored
        );
    }

    #[test]
    fn test_recency_can_outweigh_confidence() {
        let now = Utc::now();
        let mut history = DetectionHistory::default();
        history.push(detection(LearningState::Bored, 0.7, now - Duration::seconds(5)));
        history.push(detection(LearningState::Focused, 0.6, now - Duration::seconds(2)));

        // bored: 0.49 + 0.15 = 0.64; focused: 0.72
        assert_eq!(
            history.dominant_recent_state(now, window(), LearningState::Bored),
            LearningState::Focused
        );
    }

    #[test]
    fn test_empty_window_returns_fallback() {
        let now = Utc::now();
        let mut history = DetectionHistory::default();
        history.push(detection(LearningState::Tired, 0.9, now - Duration::seconds(30)));

        assert_eq!(
            history.dominant_recent_state(now, window(), LearningState::Confused),
            LearningState::Confused
        );
    }

    #[test]
    fn test_future_entries_are_ignored() {
        let now = Utc::now();
        let mut history = DetectionHistory::default();
        history.push(detection(LearningState::Tired, 0.9, now + Duration::seconds(1)));

        assert_eq!(
            history.dominant_recent_state(now, window(), LearningState::Focused),
            LearningState::Focused
        );
    }

    #[test]
    fn test_tie_goes_to_first_state() {
        let totals = [
            (LearningState::Tired, 0.85),
            (LearningState::Confused, 0.85),
            (LearningState::Bored, 0.5),
        ];
        assert_eq!(strongest(&totals), Some(LearningState::Tired));
        assert_eq!(strongest(&[]), None);
    }

    #[test]
    fn test_fifo_eviction() {
        let now = Utc::now();
        let mut history = DetectionHistory::new(3);
        for (i, state) in LearningState::ALL.iter().enumerate() {
            history.push(detection(*state, 0.5, now + Duration::seconds(i as i64)));
        }

        assert_eq!(history.len(), 3);
        let states: Vec<LearningState> = history.iter().map(|d| d.state).collect();
        assert_eq!(states, LearningState::ALL[1..].to_vec());
        assert_eq!(history.latest().map(|d| d.state), Some(LearningState::ALL[3]));
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let now = Utc::now();
        let mut history = DetectionHistory::default();
        history.push(detection(LearningState::Tired, 0.8, now - Duration::seconds(3)));
        history.push(detection(LearningState::Confused, 0.5, now - Duration::seconds(1)));

        let first = history.dominant_recent_state(now, window(), LearningState::Focused);
        let second = history.dominant_recent_state(now, window(), LearningState::Focused);
        assert_eq!(first, second);
        assert_eq!(history.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_history_never_exceeds_capacity(
            capacity in 1usize..30,
            pushes in 0usize..100,
        ) {
            let now = Utc::now();
            let mut history = DetectionHistory::new(capacity);
            for i in 0..pushes {
                history.push(detection(LearningState::Focused, 0.5, now + Duration::milliseconds(i as i64)));
                prop_assert!(history.len() <= capacity);
            }
            prop_assert_eq!(history.len(), pushes.min(capacity));
            if let Some(last) = history.latest() {
                prop_assert_eq!(last.timestamp, now + Duration::milliseconds(pushes as i64 - 1));
            }
        }
    }
}
