use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Stage {
    Preprocess,
    Extract,
    Score,
}

impl Stage {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::Extract => "extract",
            Stage::Score => "score",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum PipelineEvent {
    StageStarted { index: usize, stage: Stage },
    StageCompleted { index: usize, stage: Stage },
    StageFailed { index: usize, stage: Stage, error: String },
    WindowCompleted { processed: usize, total: usize },
    BatchFinished { successful: usize, failed: usize, cancelled: bool },
}

/// Receives pipeline progress. Called from the task driving the pipeline,
/// so implementations must not block.
pub(crate) trait PipelineObserver: Send + Sync {
    fn notify(&self, event: PipelineEvent);
}

pub(crate) struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn notify(&self, _event: PipelineEvent) {}
}

pub(crate) struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn notify(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { index, stage } => {
                tracing::debug!(index, stage = stage.as_str(), "Stage started");
            }
            PipelineEvent::StageCompleted { index, stage } => {
                tracing::debug!(index, stage = stage.as_str(), "Stage completed");
            }
            PipelineEvent::StageFailed { index, stage, error } => {
                tracing::warn!(index, stage = stage.as_str(), error = %error, "Stage failed");
            }
            PipelineEvent::WindowCompleted { processed, total } => {
                tracing::info!(processed, total, "Batch window completed");
            }
            PipelineEvent::BatchFinished { successful, failed, cancelled } => {
                tracing::info!(successful, failed, cancelled, "Batch finished");
            }
        }
    }
}
