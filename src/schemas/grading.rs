use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use validator::Validate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct BoundingBox {
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) width: f64,
    pub(crate) height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OcrSpan {
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) confidence: f64,
    #[serde(default)]
    pub(crate) bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StructuredLine {
    pub(crate) text: String,
    pub(crate) line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct DocumentStructure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) title: Option<String>,
    pub(crate) questions: Vec<StructuredLine>,
    pub(crate) equations: Vec<StructuredLine>,
    pub(crate) answers: Vec<StructuredLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExtractionResult {
    pub(crate) text: String,
    /// 0-100, as reported by the OCR engine.
    pub(crate) confidence: f64,
    pub(crate) lines: Vec<OcrSpan>,
    pub(crate) words: Vec<OcrSpan>,
    pub(crate) structure: DocumentStructure,
    pub(crate) engine: String,
    pub(crate) language: String,
    pub(crate) fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradingPoint {
    #[validate(length(min = 1, message = "grading point description is required"))]
    pub(crate) description: String,
    #[validate(range(min = 0.0, message = "grading point score must be non-negative"))]
    pub(crate) score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuestionSpec {
    #[validate(length(min = 1, message = "question id is required"))]
    pub(crate) id: String,
    #[validate(length(min = 1, message = "standard answer is required"))]
    pub(crate) standard_answer: String,
    #[validate(range(exclusive_min = 0.0, message = "total score must be greater than zero"))]
    pub(crate) total_score: f64,
    #[serde(default = "default_question_type")]
    pub(crate) question_type: String,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) grading_points: Vec<GradingPoint>,
}

fn default_question_type() -> String {
    "short_answer".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum GradeLevel {
    Excellent,
    Good,
    Fair,
    Pass,
    Fail,
}

impl GradeLevel {
    pub(crate) fn from_percentage(percentage: f64) -> Self {
        if percentage >= 90.0 {
            GradeLevel::Excellent
        } else if percentage >= 80.0 {
            GradeLevel::Good
        } else if percentage >= 70.0 {
            GradeLevel::Fair
        } else if percentage >= 60.0 {
            GradeLevel::Pass
        } else {
            GradeLevel::Fail
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScoreComparison {
    pub(crate) score_difference: f64,
    pub(crate) confidence_difference: f64,
    pub(crate) consensus_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScoreResult {
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    /// 0.0-1.0; not the OCR scale.
    pub(crate) confidence: f64,
    pub(crate) grade_level: GradeLevel,
    pub(crate) needs_review: bool,
    pub(crate) feedback: String,
    pub(crate) strengths: Vec<String>,
    pub(crate) weaknesses: Vec<String>,
    pub(crate) suggestions: Vec<String>,
    pub(crate) grading_details: Vec<Value>,
    pub(crate) model: String,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) primary: Option<Box<ScoreResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) secondary: Option<Box<ScoreResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) comparison: Option<ScoreComparison>,
}

/// Caller-facing options bag. Unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradingOptions {
    #[serde(default)]
    pub(crate) language: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1, message = "maxWidth must be at least 1"))]
    pub(crate) max_width: Option<u32>,
    #[serde(default, rename = "enhanceOCR")]
    pub(crate) enhance_ocr: Option<bool>,
    #[serde(default)]
    pub(crate) math_optimization: Option<bool>,
    #[serde(default)]
    pub(crate) chinese_punctuation: Option<bool>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0, message = "confidenceThreshold must be within 0..1"))]
    pub(crate) confidence_threshold: Option<f64>,
    #[serde(default)]
    pub(crate) dual_model_validation: Option<bool>,
    #[serde(default)]
    #[validate(range(min = 1, message = "maxConcurrent must be at least 1"))]
    pub(crate) max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct PipelineOutput {
    pub(crate) ocr: ExtractionResult,
    pub(crate) grading: ScoreResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ItemOutcome {
    pub(crate) success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<PipelineOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl ItemOutcome {
    pub(crate) fn succeeded(output: PipelineOutput) -> Self {
        Self { success: true, data: Some(output), error: None }
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct BatchItemResult {
    pub(crate) index: usize,
    #[serde(flatten)]
    pub(crate) outcome: ItemOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BatchReport {
    pub(crate) batch_id: String,
    pub(crate) results: Vec<BatchItemResult>,
    pub(crate) total: usize,
    pub(crate) successful: usize,
    pub(crate) failed: usize,
    pub(crate) cancelled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) timestamp: OffsetDateTime,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct BatchGradeRequest {
    /// Base64-encoded image files.
    #[validate(length(min = 1, message = "at least one image is required"))]
    pub(crate) images: Vec<String>,
    #[validate(length(min = 1, message = "at least one question is required"), nested)]
    pub(crate) questions: Vec<QuestionSpec>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) options: GradingOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BatchStatusResponse {
    pub(crate) state: crate::tasks::batch::BatchRunState,
    pub(crate) is_processing: bool,
    pub(crate) current_concurrent: usize,
    pub(crate) queued: usize,
}
