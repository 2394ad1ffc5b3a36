//! Async detection loop
//!
//! Samples the upstream face model at a fixed cadence and feeds each result
//! through a shared pipeline. Inference is awaited inline, so a stream never
//! has more than one inference in flight; ticks missed during a slow
//! inference are dropped rather than queued.

use crate::error::InferenceError;
use crate::pipeline::{FrameContext, FrameOutcome, LearningStatePipeline};
use crate::types::{DetectionStats, FaceObservation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Upstream face/landmark/expression model
#[async_trait]
pub trait FaceModel: Send {
    /// Whether the model weights are loaded
    fn is_ready(&self) -> bool;

    /// Run inference on the current frame. `Ok(None)` means no face.
    async fn infer(&mut self) -> Result<Option<FaceObservation>, InferenceError>;
}

/// Pipeline shared between the loop and read-only observers
pub type SharedPipeline = Arc<Mutex<LearningStatePipeline>>;

pub fn shared(pipeline: LearningStatePipeline) -> SharedPipeline {
    Arc::new(Mutex::new(pipeline))
}

/// Shortest tick period the loop will run at
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Events the loop emits to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    ClarificationRequested,
}

pub struct DetectionLoop<M: FaceModel> {
    model: M,
    pipeline: SharedPipeline,
    consumer_busy: Arc<AtomicBool>,
    events: mpsc::Sender<LoopEvent>,
    period: Duration,
}

impl<M: FaceModel> DetectionLoop<M> {
    /// Loop at the pipeline's configured frame interval
    pub fn new(model: M, pipeline: SharedPipeline, events: mpsc::Sender<LoopEvent>) -> Self {
        let period = pipeline.lock().config().frame_interval();
        Self {
            model,
            pipeline,
            consumer_busy: Arc::new(AtomicBool::new(false)),
            events,
            period: period.max(MIN_PERIOD),
        }
    }

    /// Share the host's consumer-busy flag
    pub fn with_busy_flag(mut self, consumer_busy: Arc<AtomicBool>) -> Self {
        self.consumer_busy = consumer_busy;
        self
    }

    /// Override the tick period; periods below [`MIN_PERIOD`] are raised to it
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(MIN_PERIOD);
        self
    }

    /// Run until `shutdown` becomes true or its sender is dropped.
    /// Shutdown is observed between frames only.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DetectionStats {
        info!(period_ms = self.period.as_millis() as u64, "detection loop started");

        // Frame timestamps follow the tokio clock from a wall-clock origin
        let origin = (Utc::now(), Instant::now());
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let now = frame_time(origin);
            self.step(now).await;
        }

        let stats = self.pipeline.lock().stats();
        info!(
            total = stats.total,
            successful = stats.successful,
            failed = stats.failed,
            "detection loop stopped"
        );
        stats
    }

    /// Sample one frame and push it through the pipeline
    pub async fn step(&mut self, now: DateTime<Utc>) -> FrameOutcome {
        let frame = if self.model.is_ready() {
            self.model.infer().await
        } else {
            Err(InferenceError::ModelUnavailable(
                "face model not loaded".to_string(),
            ))
        };

        let ctx = FrameContext::at(now).busy(self.consumer_busy.load(Ordering::SeqCst));
        let outcome = self.pipeline.lock().process_frame(frame, ctx);

        if outcome.clarification_requested() {
            debug!("requesting clarification");
            if self.events.send(LoopEvent::ClarificationRequested).await.is_err() {
                warn!("clarification dropped: event receiver closed");
            }
        }
        outcome
    }
}

fn frame_time(origin: (DateTime<Utc>, Instant)) -> DateTime<Utc> {
    chrono::Duration::from_std(origin.1.elapsed())
        .map(|elapsed| origin.0 + elapsed)
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::tests::{face, FaceShape};
    use crate::types::{ExpressionVector, LearningState};
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn confused() -> FaceObservation {
        FaceObservation::new(
            face(FaceShape {
                brow_gap: 10.0,
                ..Default::default()
            }),
            ExpressionVector {
                surprised: 0.6,
                neutral: 0.4,
                ..Default::default()
            },
        )
    }

    /// Plays back scripted frames, then reports no face
    struct ScriptedModel {
        ready: bool,
        frames: VecDeque<FaceObservation>,
        latency: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedModel {
        fn new(frames: Vec<FaceObservation>) -> Self {
            Self {
                ready: true,
                frames: frames.into(),
                latency: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl FaceModel for ScriptedModel {
        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn infer(&mut self) -> Result<Option<FaceObservation>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            Ok(self.frames.pop_front())
        }
    }

    async fn run_for<M: FaceModel + 'static>(
        detection: DetectionLoop<M>,
        duration: Duration,
    ) -> DetectionStats {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(detection.run(stop_rx));
        tokio::time::sleep(duration).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_confusion_emits_one_clarification() {
        let pipeline = shared(LearningStatePipeline::new());
        let (tx, mut rx) = mpsc::channel(8);
        let model = ScriptedModel::new(vec![confused(); 6]);
        let detection = DetectionLoop::new(model, pipeline.clone(), tx);

        let stats = run_for(detection, Duration::from_millis(5500)).await;

        assert_eq!(rx.try_recv(), Ok(LoopEvent::ClarificationRequested));
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.successful, 6);
        assert_eq!(pipeline.lock().published_state(), LearningState::Confused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_consumer_gets_no_event() {
        let pipeline = shared(LearningStatePipeline::new());
        let (tx, mut rx) = mpsc::channel(8);
        let busy = Arc::new(AtomicBool::new(true));
        let detection = DetectionLoop::new(ScriptedModel::new(vec![confused(); 4]), pipeline.clone(), tx)
            .with_busy_flag(busy);

        run_for(detection, Duration::from_millis(4500)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(pipeline.lock().published_state(), LearningState::Confused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_model_counts_nothing() {
        let pipeline = shared(LearningStatePipeline::new());
        let (tx, _rx) = mpsc::channel(8);
        let mut model = ScriptedModel::new(vec![confused(); 3]);
        model.ready = false;
        let calls = model.calls.clone();

        let stats = run_for(DetectionLoop::new(model, pipeline, tx), Duration::from_secs(3)).await;

        assert_eq!(stats, DetectionStats::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_inference_drops_ticks() {
        let pipeline = shared(LearningStatePipeline::new());
        let (tx, _rx) = mpsc::channel(8);
        let mut model = ScriptedModel::new(Vec::new());
        model.latency = Duration::from_millis(2500);
        let calls = model.calls.clone();

        let stats = run_for(DetectionLoop::new(model, pipeline, tx), Duration::from_secs(10)).await;

        let calls = calls.load(Ordering::SeqCst);
        assert!((3..=5).contains(&calls), "calls = {}", calls);
        assert_eq!(stats.total as usize, calls);
        assert_eq!(stats.failed, stats.total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let pipeline = shared(LearningStatePipeline::new());
        let (tx, _rx) = mpsc::channel(8);
        let detection =
            DetectionLoop::new(ScriptedModel::new(Vec::new()), pipeline, tx).with_period(Duration::ZERO);
        assert_eq!(detection.period, MIN_PERIOD);

        let stats = run_for(detection, Duration::from_millis(10)).await;
        assert!(stats.total >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_timestamps_follow_ticks() {
        let pipeline = shared(LearningStatePipeline::new());
        let (tx, _rx) = mpsc::channel(8);
        let model = ScriptedModel::new(vec![confused(); 3]);

        run_for(DetectionLoop::new(model, pipeline.clone(), tx), Duration::from_millis(2500)).await;

        let guard = pipeline.lock();
        let stamps: Vec<DateTime<Utc>> = guard.history().iter().map(|d| d.timestamp).collect();
        assert_eq!(stamps.len(), 3);
        for pair in stamps.windows(2) {
            assert_eq!((pair[1] - pair[0]).num_seconds(), 1);
        }
    }
}
