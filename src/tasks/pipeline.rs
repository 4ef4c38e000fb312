use std::future::Future;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::core::config::Settings;
use crate::schemas::grading::{
    GradingOptions, ItemOutcome, PipelineOutput, QuestionSpec, ScoreResult,
};
use crate::services::errors::GradingError;
use crate::services::image_preprocess::{ImagePreprocessor, ImageSource, PreprocessOptions};
use crate::services::result_cache::ResultCache;
use crate::services::scoring::{ScoringEngine, ScoringOptions};
use crate::services::text_extraction::{ExtractionOptions, TextExtractionService};
use crate::tasks::events::{PipelineEvent, PipelineObserver, Stage};

pub(crate) const DEFAULT_MAX_CONCURRENT: usize = 3;
pub(crate) const DEFAULT_LANGUAGE: &str = "eng";

/// Fully resolved options for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PipelineOptions {
    pub(crate) language: String,
    pub(crate) preprocess: PreprocessOptions,
    pub(crate) extraction: ExtractionOptions,
    pub(crate) scoring: ScoringOptions,
    pub(crate) max_concurrent: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            preprocess: PreprocessOptions { enhance: true, ..PreprocessOptions::default() },
            extraction: ExtractionOptions { math_optimization: true, chinese_punctuation: false },
            scoring: ScoringOptions::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl PipelineOptions {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let grading = settings.grading();
        Self {
            language: settings.ocr().default_language.clone(),
            preprocess: PreprocessOptions {
                max_size: grading.preprocess_max_size,
                max_width: grading.preprocess_max_width,
                enhance: grading.enhance_ocr,
                ..PreprocessOptions::default()
            },
            extraction: ExtractionOptions {
                math_optimization: grading.math_optimization,
                chinese_punctuation: grading.chinese_punctuation,
            },
            scoring: ScoringOptions {
                dual_model_validation: grading.dual_model_validation,
                confidence_threshold: grading.confidence_threshold,
            },
            max_concurrent: grading.max_concurrent,
        }
    }

    /// Apply caller overrides on top of these defaults.
    pub(crate) fn with_overrides(&self, overrides: &GradingOptions) -> Self {
        let mut options = self.clone();
        if let Some(language) = overrides.language.as_ref().filter(|value| !value.trim().is_empty()) {
            options.language = language.trim().to_string();
        }
        if let Some(max_width) = overrides.max_width {
            options.preprocess.max_width = Some(max_width.max(1));
        }
        if let Some(enhance) = overrides.enhance_ocr {
            options.preprocess.enhance = enhance;
        }
        if let Some(math) = overrides.math_optimization {
            options.extraction.math_optimization = math;
        }
        if let Some(punctuation) = overrides.chinese_punctuation {
            options.extraction.chinese_punctuation = punctuation;
        }
        if let Some(threshold) = overrides.confidence_threshold {
            options.scoring.confidence_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(dual) = overrides.dual_model_validation {
            options.scoring.dual_model_validation = dual;
        }
        if let Some(max_concurrent) = overrides.max_concurrent {
            options.max_concurrent = max_concurrent.max(1);
        }
        options
    }
}

/// preprocess -> extract -> score for one image, plus the result cache.
pub(crate) struct GradingPipeline {
    preprocessor: ImagePreprocessor,
    extractor: TextExtractionService,
    scorer: ScoringEngine,
    defaults: PipelineOptions,
    cache: Mutex<ResultCache<ScoreResult>>,
}

impl GradingPipeline {
    pub(crate) fn new(
        extractor: TextExtractionService,
        scorer: ScoringEngine,
        defaults: PipelineOptions,
        cache_capacity: usize,
    ) -> Self {
        Self {
            preprocessor: ImagePreprocessor,
            extractor,
            scorer,
            defaults,
            cache: Mutex::new(ResultCache::new(cache_capacity)),
        }
    }

    pub(crate) fn defaults(&self) -> &PipelineOptions {
        &self.defaults
    }

    pub(crate) fn ocr_engine_name(&self) -> &str {
        self.extractor.engine_name()
    }

    pub(crate) fn has_secondary_model(&self) -> bool {
        self.scorer.has_secondary()
    }

    pub(crate) async fn process_one(
        &self,
        index: usize,
        image: ImageSource,
        question: &QuestionSpec,
        options: &PipelineOptions,
        observer: &dyn PipelineObserver,
    ) -> Result<PipelineOutput, GradingError> {
        let preprocessor = self.preprocessor.clone();
        let preprocess_options = options.preprocess.clone();
        let prepared = run_stage(index, Stage::Preprocess, observer, async move {
            tokio::task::spawn_blocking(move || {
                let raster = image.into_raster()?;
                preprocessor.preprocess(&raster, &preprocess_options)
            })
                .await
                .map_err(|err| GradingError::Internal(format!("preprocess task failed: {err}")))?
        })
        .await?;

        let ocr = run_stage(
            index,
            Stage::Extract,
            observer,
            self.extractor.extract(&prepared, &options.language, &options.extraction),
        )
        .await?;

        let mut grading = run_stage(
            index,
            Stage::Score,
            observer,
            self.scorer.score(&ocr, question, &options.scoring),
        )
        .await?;

        if ocr.fallback {
            grading.needs_review = true;
        }

        self.cache.lock().await.insert(&question.id, grading.clone());

        Ok(PipelineOutput { ocr, grading })
    }

    /// Same as `process_one`, with any error folded into the outcome.
    pub(crate) async fn process_item(
        &self,
        index: usize,
        image: ImageSource,
        question: &QuestionSpec,
        options: &PipelineOptions,
        observer: &dyn PipelineObserver,
    ) -> ItemOutcome {
        match self.process_one(index, image, question, options, observer).await {
            Ok(output) => {
                metrics::counter!("pipeline_items_total", "status" => "success").increment(1);
                tracing::info!(
                    index,
                    question_id = %question.id,
                    score = output.grading.score,
                    needs_review = output.grading.needs_review,
                    "Graded item"
                );
                ItemOutcome::succeeded(output)
            }
            Err(err) => {
                metrics::counter!("pipeline_items_total", "status" => "failed").increment(1);
                tracing::warn!(
                    index,
                    question_id = %question.id,
                    kind = err.kind(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Item failed"
                );
                ItemOutcome::failed(err.to_string())
            }
        }
    }

    pub(crate) async fn cached_result(&self, question_id: &str) -> Option<ScoreResult> {
        self.cache.lock().await.get(question_id)
    }

    pub(crate) async fn remove_result(&self, question_id: &str) -> Option<ScoreResult> {
        self.cache.lock().await.remove(question_id)
    }

    pub(crate) async fn clear_cache(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let cleared = cache.len();
        cache.clear();
        cleared
    }
}

async fn run_stage<T, F>(
    index: usize,
    stage: Stage,
    observer: &dyn PipelineObserver,
    work: F,
) -> Result<T, GradingError>
where
    F: Future<Output = Result<T, GradingError>>,
{
    observer.notify(PipelineEvent::StageStarted { index, stage });
    let timer = Instant::now();
    let result = work.await;
    metrics::histogram!("pipeline_stage_duration_seconds", "stage" => stage.as_str())
        .record(timer.elapsed().as_secs_f64());

    match &result {
        Ok(_) => observer.notify(PipelineEvent::StageCompleted { index, stage }),
        Err(err) => {
            observer.notify(PipelineEvent::StageFailed { index, stage, error: err.to_string() })
        }
    }
    result
}
