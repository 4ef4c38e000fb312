use std::sync::Arc;
use std::time::Instant;

use crate::schemas::grading::ExtractionResult;
use crate::services::errors::GradingError;
use crate::services::image_preprocess::RasterImage;
use crate::services::ocr_engine::{OcrEngine, OcrOutput};
use crate::services::text_structure::{
    analyze_structure, normalize_cjk_punctuation, normalize_math_symbols, normalize_whitespace,
};

pub(crate) const FALLBACK_ENGINE: &str = "fallback";
pub(crate) const FALLBACK_TEXT: &str = "[OCR engine unavailable: no text was recognized]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ExtractionOptions {
    pub(crate) math_optimization: bool,
    pub(crate) chinese_punctuation: bool,
}

#[derive(Clone)]
pub(crate) struct TextExtractionService {
    engine: Option<Arc<dyn OcrEngine>>,
}

impl TextExtractionService {
    pub(crate) fn new(engine: Option<Arc<dyn OcrEngine>>) -> Self {
        Self { engine }
    }

    pub(crate) fn engine_name(&self) -> &str {
        self.engine.as_deref().map(|engine| engine.name()).unwrap_or(FALLBACK_ENGINE)
    }

    pub(crate) async fn extract(
        &self,
        image: &RasterImage,
        language: &str,
        options: &ExtractionOptions,
    ) -> Result<ExtractionResult, GradingError> {
        let Some(engine) = self.engine.as_ref() else {
            tracing::warn!(language, "No OCR engine configured; returning fallback extraction");
            metrics::counter!("ocr_requests_total", "status" => "fallback").increment(1);
            return Ok(fallback_result(language, options));
        };

        let bytes = image.encode_png()?;
        let timer = Instant::now();
        let output = match engine.recognize(&bytes, language).await {
            Ok(output) => output,
            Err(err) => {
                metrics::counter!("ocr_requests_total", "status" => "failed").increment(1);
                return Err(match err {
                    GradingError::OcrEngine(_) => err,
                    other => GradingError::OcrEngine(other.to_string()),
                });
            }
        };
        metrics::counter!("ocr_requests_total", "status" => "success").increment(1);
        metrics::histogram!("ocr_duration_seconds").record(timer.elapsed().as_secs_f64());

        tracing::debug!(
            engine = engine.name(),
            language,
            confidence = output.confidence,
            lines = output.lines.len(),
            "OCR completed"
        );

        Ok(build_result(output, engine.name(), language, options, false))
    }
}

/// Math symbols, then punctuation, then whitespace. The order is fixed.
pub(crate) fn post_process(text: &str, options: &ExtractionOptions) -> String {
    let mut text = text.to_string();
    if options.math_optimization {
        text = normalize_math_symbols(&text);
    }
    if options.chinese_punctuation {
        text = normalize_cjk_punctuation(&text);
    }
    normalize_whitespace(&text)
}

fn build_result(
    output: OcrOutput,
    engine: &str,
    language: &str,
    options: &ExtractionOptions,
    fallback: bool,
) -> ExtractionResult {
    let text = post_process(&output.text, options);
    let structure = analyze_structure(&text);
    ExtractionResult {
        text,
        confidence: output.confidence.clamp(0.0, 100.0),
        lines: output.lines,
        words: output.words,
        structure,
        engine: engine.to_string(),
        language: language.to_string(),
        fallback,
    }
}

fn fallback_result(language: &str, options: &ExtractionOptions) -> ExtractionResult {
    let output = OcrOutput { text: FALLBACK_TEXT.to_string(), ..OcrOutput::default() };
    build_result(output, FALLBACK_ENGINE, language, options, true)
}
