//! The edge processing pipeline and its bounded-concurrency worker pool.
//!
//! Each intake frame flows Decode → Transform → Infer → Persist inside
//! one worker, end-to-end, before that worker takes the next frame. A
//! bounded queue between the intake task and the pool provides
//! backpressure: when it is full, frames are dropped with a counted
//! metric, never buffered without bound and never dropped silently.
//!
//! Per-event failures drop that event and keep the worker alive; only
//! transport exhaustion or startup validation stop the pipeline.

use crate::acquisition::decoder::{DecodeError, TelemetryDecoder};
use crate::acquisition::source::{EventSource, IntakeFrame, SourceEvent};
use crate::model::engine::{InferenceEngine, InferenceError};
use crate::model::features::{FeatureTransform, TransformError};
use crate::pipeline::stats::{DropReason, StatsAggregator};
use crate::storage::{FabStore, StoreError};
use crate::types::{PredictionResult, ProductionLine};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything that can fail for one event between decode and persist.
#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl EventError {
    /// Drop-counter bucket for this failure.
    pub fn drop_reason(&self) -> DropReason {
        match self {
            EventError::Decode(_) => DropReason::Decode,
            EventError::Transform(TransformError::UnknownCategory { .. }) => {
                DropReason::UnknownCategory
            }
            EventError::Inference(_) => DropReason::Inference,
            EventError::Persistence(_) => DropReason::Persistence,
        }
    }
}

/// Summary of one fully processed event, for logging.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub line: ProductionLine,
    pub wafer_id: String,
    pub prediction: PredictionResult,
    pub event_id: u64,
    pub alert_id: Option<u64>,
}

/// The full per-event pipeline, shared read-only across workers.
pub struct EdgePipeline {
    decoder: TelemetryDecoder,
    transform: FeatureTransform,
    engine: InferenceEngine,
    store: FabStore,
    stats: Arc<StatsAggregator>,
}

impl EdgePipeline {
    pub fn new(
        decoder: TelemetryDecoder,
        transform: FeatureTransform,
        engine: InferenceEngine,
        store: FabStore,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            decoder,
            transform,
            engine,
            store,
            stats,
        }
    }

    /// Run one frame through decode → transform → infer → persist.
    ///
    /// Statistics are incremented only when every stage succeeded; a
    /// dropped event leaves both the counters and the durable store
    /// untouched (no synthetic records for failures).
    pub fn process_frame(&self, frame: &IntakeFrame) -> Result<ProcessedEvent, EventError> {
        let event = self.decoder.decode(&frame.topic, &frame.payload)?;
        let vector = self.transform.vector(&event)?;
        let prediction = self.engine.classify(&vector)?;
        let outcome = self.store.record_inspection(&event, &prediction)?;

        self.stats
            .record_processed(event.production_line, prediction.decision);

        Ok(ProcessedEvent {
            line: event.production_line,
            wafer_id: event.wafer_id,
            prediction,
            event_id: outcome.event_id,
            alert_id: outcome.alert_id,
        })
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

/// Spawn `count` workers draining `queue` into the pipeline.
///
/// Workers exit when the queue closes (intake finished) and the backlog
/// is drained, so shutdown never aborts an event mid-transaction.
pub fn spawn_workers(
    count: usize,
    pipeline: Arc<EdgePipeline>,
    queue: mpsc::Receiver<IntakeFrame>,
    tasks: &mut JoinSet<()>,
) {
    let queue = Arc::new(tokio::sync::Mutex::new(queue));
    for worker_id in 0..count {
        let pipeline = pipeline.clone();
        let queue = queue.clone();
        tasks.spawn(worker_loop(worker_id, pipeline, queue));
    }
}

async fn worker_loop(
    worker_id: usize,
    pipeline: Arc<EdgePipeline>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<IntakeFrame>>>,
) {
    debug!("Worker {worker_id} started");
    loop {
        let frame = { queue.lock().await.recv().await };
        let Some(frame) = frame else {
            break; // queue closed and drained
        };

        match pipeline.process_frame(&frame) {
            Ok(processed) => {
                let marker = if processed.prediction.decision {
                    "🔴 DEFECT"
                } else {
                    "🟢 OK"
                };
                info!(
                    "[{:>4}] {:<12} | Wafer: {} | Prob: {:.3} | {}",
                    processed.event_id,
                    processed.line,
                    processed.wafer_id,
                    processed.prediction.probability,
                    marker
                );
            }
            Err(e) => {
                let reason = e.drop_reason();
                pipeline.stats.record_drop(reason);
                warn!(topic = %frame.topic, ?reason, "Event dropped: {e}");
            }
        }
    }
    debug!("Worker {worker_id} drained and exiting");
}

// ============================================================================
// Intake
// ============================================================================

/// Drive an [`EventSource`] into the bounded queue until EOF, transport
/// exhaustion, or shutdown. Dropping the sender on return is what lets
/// the workers drain and exit.
pub async fn run_intake<S: EventSource>(
    mut source: S,
    queue: mpsc::Sender<IntakeFrame>,
    stats: Arc<StatsAggregator>,
    cancel: CancellationToken,
) {
    info!("📡 Intake started ({} source)", source.source_name());
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[Intake] Shutdown signal received — draining in-flight events");
                break;
            }
            result = source.next_frame() => match result {
                Ok(event) => event,
                Err(e) => {
                    error!("[Intake] Transport failed: {e}");
                    break;
                }
            },
        };

        match event {
            SourceEvent::Frame(frame) => match queue.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    stats.record_drop(DropReason::QueueFull);
                    warn!(topic = %frame.topic, "Intake queue full — dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("[Intake] Queue closed — stopping");
                    break;
                }
            },
            SourceEvent::Eof => {
                info!("[Intake] Source reached end of data");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::source::ReplaySource;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn intake_forwards_frames_then_closes_queue() {
        let frames = vec![
            IntakeFrame {
                topic: "t1".into(),
                payload: b"{}".to_vec(),
            },
            IntakeFrame {
                topic: "t2".into(),
                payload: b"{}".to_vec(),
            },
        ];
        let (tx, mut rx) = mpsc::channel(8);
        let stats = Arc::new(StatsAggregator::new());
        run_intake(
            ReplaySource::new(frames, 0),
            tx,
            stats.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(rx.recv().await.unwrap().topic, "t1");
        assert_eq!(rx.recv().await.unwrap().topic, "t2");
        // Sender dropped on intake return → channel closed.
        assert!(rx.recv().await.is_none());
        assert_eq!(stats.snapshot().dropped.queue_full, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_are_counted_not_silent() {
        let frames: Vec<IntakeFrame> = (0..5)
            .map(|i| IntakeFrame {
                topic: format!("t{i}"),
                payload: b"{}".to_vec(),
            })
            .collect();
        let (tx, mut rx) = mpsc::channel(2);
        let stats = Arc::new(StatsAggregator::new());
        run_intake(
            ReplaySource::new(frames, 0),
            tx,
            stats.clone(),
            CancellationToken::new(),
        )
        .await;

        // Two queued, three dropped with the countable metric.
        assert_eq!(stats.snapshot().dropped.queue_full, 3);
        let mut delivered = 0;
        while rx.recv().await.is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_intake() {
        // A replay source with a long delay parks intake in next_frame;
        // cancellation must win the select.
        let frames = vec![
            IntakeFrame {
                topic: "t".into(),
                payload: b"{}".to_vec(),
            };
            2
        ];
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = timeout(
            Duration::from_secs(1),
            run_intake(
                ReplaySource::new(frames, 60_000),
                tx,
                Arc::new(StatsAggregator::new()),
                cancel,
            ),
        )
        .await;
        assert!(result.is_ok(), "intake did not honor cancellation");
    }
}
