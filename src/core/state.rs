use std::sync::Arc;

use crate::core::config::Settings;
use crate::services::ocr_engine::{HttpOcrEngine, OcrEngine};
use crate::services::scoring::ScoringEngine;
use crate::services::text_extraction::TextExtractionService;
use crate::tasks::batch::BatchRunner;
use crate::tasks::pipeline::{GradingPipeline, PipelineOptions};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    pipeline: Arc<GradingPipeline>,
    batch: Arc<BatchRunner>,
}

impl AppState {
    pub(crate) fn new(settings: Settings, pipeline: Arc<GradingPipeline>) -> Self {
        let batch = Arc::new(BatchRunner::new(Arc::clone(&pipeline)));
        Self { inner: Arc::new(InnerState { settings, pipeline, batch }) }
    }

    /// Wires the HTTP OCR engine (when configured) and the OpenAI scorer.
    pub(crate) fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let engine = HttpOcrEngine::from_settings(&settings)?
            .map(|engine| Arc::new(engine) as Arc<dyn OcrEngine>);
        if engine.is_none() {
            tracing::warn!("OCR_API_URL is not set; text extraction will use the fallback engine");
        }

        let extractor = TextExtractionService::new(engine);
        let scorer = ScoringEngine::from_settings(&settings)?;
        let pipeline = GradingPipeline::new(
            extractor,
            scorer,
            PipelineOptions::from_settings(&settings),
            settings.grading().result_cache_capacity,
        );

        Ok(Self::new(settings, Arc::new(pipeline)))
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn pipeline(&self) -> &Arc<GradingPipeline> {
        &self.inner.pipeline
    }

    pub(crate) fn batch(&self) -> &Arc<BatchRunner> {
        &self.inner.batch
    }
}
