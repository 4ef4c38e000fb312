use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use crate::schemas::grading::{
    BatchItemResult, BatchReport, BatchStatusResponse, GradingOptions, ItemOutcome, QuestionSpec,
};
use crate::services::errors::GradingError;
use crate::services::image_preprocess::ImageSource;
use crate::tasks::events::{PipelineEvent, PipelineObserver};
use crate::tasks::pipeline::GradingPipeline;

pub(crate) const CANCELLED_BEFORE_START: &str = "cancelled before start";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BatchRunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl BatchRunState {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, BatchRunState::Completed | BatchRunState::Cancelled)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            BatchRunState::Idle => "idle",
            BatchRunState::Running => "running",
            BatchRunState::Completed => "completed",
            BatchRunState::Cancelled => "cancelled",
        }
    }
}

/// Drives many pipeline items in fixed-size concurrent windows. One run at a
/// time; controls act on the current run.
pub(crate) struct BatchRunner {
    pipeline: Arc<GradingPipeline>,
    state: Mutex<BatchRunState>,
    is_processing: AtomicBool,
    cancel_requested: AtomicBool,
    current_concurrent: AtomicUsize,
    queued: AtomicUsize,
    wake: watch::Sender<()>,
}

impl BatchRunner {
    pub(crate) fn new(pipeline: Arc<GradingPipeline>) -> Self {
        let (wake, _) = watch::channel(());
        Self {
            pipeline,
            state: Mutex::new(BatchRunState::Idle),
            is_processing: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            current_concurrent: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            wake,
        }
    }

    pub(crate) fn state(&self) -> BatchRunState {
        *self.lock_state()
    }

    pub(crate) fn status(&self) -> BatchStatusResponse {
        BatchStatusResponse {
            state: self.state(),
            is_processing: self.is_processing.load(Ordering::SeqCst),
            current_concurrent: self.current_concurrent.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
        }
    }

    /// A paused run stops at the next window boundary.
    pub(crate) fn pause(&self) -> Result<(), GradingError> {
        self.require_running("no batch is running")?;
        self.is_processing.store(false, Ordering::SeqCst);
        tracing::info!("Batch paused");
        Ok(())
    }

    pub(crate) fn resume(&self) -> Result<(), GradingError> {
        self.require_running("no batch is running")?;
        self.is_processing.store(true, Ordering::SeqCst);
        self.wake.send_replace(());
        tracing::info!("Batch resumed");
        Ok(())
    }

    /// Items already in flight finish; everything still queued is reported
    /// as failed without being started.
    pub(crate) fn cancel(&self) -> Result<(), GradingError> {
        self.require_running("no batch is running")?;
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.is_processing.store(false, Ordering::SeqCst);
        self.wake.send_replace(());
        tracing::info!(queued = self.queued.load(Ordering::SeqCst), "Batch cancellation requested");
        Ok(())
    }

    pub(crate) fn reset(&self) -> Result<(), GradingError> {
        let mut state = self.lock_state();
        match *state {
            BatchRunState::Running => Err(GradingError::InvalidState("cannot reset a running batch")),
            _ => {
                *state = BatchRunState::Idle;
                Ok(())
            }
        }
    }

    pub(crate) async fn process_many(
        &self,
        images: Vec<ImageSource>,
        questions: &[QuestionSpec],
        options: &GradingOptions,
        observer: &dyn PipelineObserver,
    ) -> Result<BatchReport, GradingError> {
        let Some(first_question) = questions.first() else {
            return Err(GradingError::Validation("at least one question is required".to_string()));
        };
        if images.is_empty() {
            return Err(GradingError::Validation("at least one image is required".to_string()));
        }
        if questions.len() < images.len() {
            tracing::warn!(
                images = images.len(),
                questions = questions.len(),
                "Fewer questions than images; reusing the first question"
            );
        }

        self.start(images.len())?;

        let options = self.pipeline.defaults().with_overrides(options);
        let window_size = options.max_concurrent.max(1);
        let total = images.len();
        let batch_id = Uuid::new_v4().to_string();
        tracing::info!(batch_id = %batch_id, total, window_size, "Batch started");

        let mut queue: VecDeque<(usize, ImageSource)> = images.into_iter().enumerate().collect();
        let mut results: Vec<BatchItemResult> = Vec::with_capacity(total);
        let mut processed = 0usize;

        while !queue.is_empty() {
            self.wait_while_paused().await;
            if self.cancel_requested.load(Ordering::SeqCst) {
                results.extend(queue.drain(..).map(|(index, _)| BatchItemResult {
                    index,
                    outcome: ItemOutcome::failed(CANCELLED_BEFORE_START),
                }));
                break;
            }

            let take = window_size.min(queue.len());
            let window: Vec<(usize, ImageSource)> = queue.drain(..take).collect();
            self.queued.store(queue.len(), Ordering::SeqCst);
            self.current_concurrent.store(window.len(), Ordering::SeqCst);
            metrics::gauge!("batch_in_flight").set(window.len() as f64);

            let pipeline = &self.pipeline;
            let options = &options;
            let outcomes = join_all(window.into_iter().map(|(index, image)| {
                let question = questions.get(index).unwrap_or(first_question);
                async move {
                    let outcome = pipeline.process_item(index, image, question, options, observer).await;
                    BatchItemResult { index, outcome }
                }
            }))
            .await;

            self.current_concurrent.store(0, Ordering::SeqCst);
            metrics::gauge!("batch_in_flight").set(0.0);
            processed += outcomes.len();
            results.extend(outcomes);
            observer.notify(PipelineEvent::WindowCompleted { processed, total });
        }

        results.sort_by_key(|result| result.index);
        let cancelled = self.cancel_requested.load(Ordering::SeqCst);
        let successful = results.iter().filter(|result| result.outcome.success).count();
        let failed = results.len() - successful;

        let final_state = self.finish(cancelled);
        metrics::counter!("batch_runs_total", "status" => final_state.as_str()).increment(1);
        observer.notify(PipelineEvent::BatchFinished { successful, failed, cancelled });
        tracing::info!(batch_id = %batch_id, total, successful, failed, cancelled, "Batch finished");

        Ok(BatchReport {
            batch_id,
            results,
            total,
            successful,
            failed,
            cancelled,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    fn start(&self, queued: usize) -> Result<(), GradingError> {
        let mut state = self.lock_state();
        match *state {
            BatchRunState::Idle => {}
            BatchRunState::Running => {
                return Err(GradingError::InvalidState("a batch is already running"))
            }
            BatchRunState::Completed | BatchRunState::Cancelled => {
                return Err(GradingError::InvalidState("previous batch must be reset first"))
            }
        }
        *state = BatchRunState::Running;
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.is_processing.store(true, Ordering::SeqCst);
        self.current_concurrent.store(0, Ordering::SeqCst);
        self.queued.store(queued, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&self, cancelled: bool) -> BatchRunState {
        let final_state = if cancelled { BatchRunState::Cancelled } else { BatchRunState::Completed };
        *self.lock_state() = final_state;
        self.is_processing.store(false, Ordering::SeqCst);
        self.current_concurrent.store(0, Ordering::SeqCst);
        self.queued.store(0, Ordering::SeqCst);
        final_state
    }

    async fn wait_while_paused(&self) {
        let mut wake = self.wake.subscribe();
        while !self.is_processing.load(Ordering::SeqCst)
            && !self.cancel_requested.load(Ordering::SeqCst)
        {
            if wake.changed().await.is_err() {
                break;
            }
        }
    }

    fn require_running(&self, message: &'static str) -> Result<(), GradingError> {
        if self.state() == BatchRunState::Running {
            Ok(())
        } else {
            Err(GradingError::InvalidState(message))
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BatchRunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
