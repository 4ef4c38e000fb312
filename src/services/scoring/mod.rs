mod consensus;
mod prompt;
mod response;

use std::sync::Arc;

use time::OffsetDateTime;
use validator::Validate;

use crate::core::config::Settings;
use crate::schemas::grading::{ExtractionResult, GradeLevel, QuestionSpec, ScoreResult};
use crate::services::ai_client::{ChatClient, ChatMessage, ChatOptions};
use crate::services::errors::GradingError;

pub(crate) use consensus::percentage;
use prompt::{build_grading_prompt, build_secondary_prompt, GRADING_SYSTEM_PROMPT};
use response::parse_score_response;

pub(crate) const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScoringOptions {
    pub(crate) dual_model_validation: bool,
    pub(crate) confidence_threshold: f64,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self { dual_model_validation: false, confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD }
    }
}

pub(crate) type Clock = fn() -> OffsetDateTime;

#[derive(Clone)]
pub(crate) struct ScoringEngine {
    primary: Arc<dyn ChatClient>,
    secondary: Option<Arc<dyn ChatClient>>,
    chat_options: ChatOptions,
    clock: Clock,
}

impl ScoringEngine {
    pub(crate) fn new(
        primary: Arc<dyn ChatClient>,
        secondary: Option<Arc<dyn ChatClient>>,
        chat_options: ChatOptions,
    ) -> Self {
        Self { primary, secondary, chat_options, clock: OffsetDateTime::now_utc }
    }

    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        use crate::services::ai_client::OpenAiChatClient;

        let ai = settings.ai();
        let primary: Arc<dyn ChatClient> = Arc::new(OpenAiChatClient::new(settings, &ai.model)?);
        let secondary = match ai.secondary_model.as_deref() {
            Some(model) => {
                Some(Arc::new(OpenAiChatClient::new(settings, model)?) as Arc<dyn ChatClient>)
            }
            None => None,
        };
        let options = ChatOptions { temperature: ai.temperature, max_tokens: ai.max_tokens };
        Ok(Self::new(primary, secondary, options))
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub(crate) async fn score(
        &self,
        extraction: &ExtractionResult,
        question: &QuestionSpec,
        options: &ScoringOptions,
    ) -> Result<ScoreResult, GradingError> {
        validate_input(extraction, question)?;

        let mode = if options.dual_model_validation { "dual" } else { "single" };
        let result = if options.dual_model_validation {
            self.score_with_consensus(extraction, question, options).await
        } else {
            self.score_single(self.primary.as_ref(), build_grading_prompt(question, &extraction.text), question)
                .await
        };

        match result {
            Ok(result) => {
                metrics::counter!("scoring_requests_total", "mode" => mode, "status" => "success")
                    .increment(1);
                Ok(apply_grading_rules(result, question, options.confidence_threshold))
            }
            Err(err) => {
                metrics::counter!("scoring_requests_total", "mode" => mode, "status" => "failed")
                    .increment(1);
                Err(err)
            }
        }
    }

    async fn score_with_consensus(
        &self,
        extraction: &ExtractionResult,
        question: &QuestionSpec,
        options: &ScoringOptions,
    ) -> Result<ScoreResult, GradingError> {
        let primary = self
            .score_single(self.primary.as_ref(), build_grading_prompt(question, &extraction.text), question)
            .await?;

        let Some(secondary_client) = self.secondary.as_ref() else {
            tracing::warn!(question_id = %question.id, "No secondary model configured; using single-model result");
            return Ok(primary);
        };

        let secondary = match self
            .score_single(
                secondary_client.as_ref(),
                build_secondary_prompt(question, &extraction.text),
                question,
            )
            .await
        {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    question_id = %question.id,
                    model = secondary_client.model(),
                    error = %err,
                    "Secondary scoring failed; using single-model result"
                );
                return Ok(primary);
            }
        };

        let consensus = consensus::reconcile(&primary, &secondary, options.confidence_threshold);
        tracing::info!(
            question_id = %question.id,
            score_difference = consensus.score_difference,
            consensus_score = consensus.score,
            "Dual-model consensus computed"
        );
        Ok(consensus::merge(primary, secondary, consensus))
    }

    async fn score_single(
        &self,
        client: &dyn ChatClient,
        user_prompt: String,
        question: &QuestionSpec,
    ) -> Result<ScoreResult, GradingError> {
        let messages = [ChatMessage::system(GRADING_SYSTEM_PROMPT), ChatMessage::user(user_prompt)];
        let completion = client.chat(&messages, self.chat_options).await.map_err(|err| match err {
            GradingError::ScoringService(_) | GradingError::ResponseFormat(_) => err,
            other => GradingError::ScoringService(other.to_string()),
        })?;

        let content = completion
            .first_content()
            .ok_or_else(|| GradingError::ResponseFormat("response has no choices".into()))?;
        let payload = parse_score_response(content)?;
        let confidence = payload.normalized_confidence();

        Ok(ScoreResult {
            score: payload.score,
            max_score: question.total_score,
            confidence,
            grade_level: GradeLevel::from_percentage(percentage(payload.score, question.total_score)),
            needs_review: false,
            feedback: payload.feedback,
            strengths: payload.strengths,
            weaknesses: payload.weaknesses,
            suggestions: payload.suggestions,
            grading_details: payload.grading_details,
            model: client.model().to_string(),
            timestamp: (self.clock)(),
            primary: None,
            secondary: None,
            comparison: None,
        })
    }
}

pub(crate) fn validate_input(
    extraction: &ExtractionResult,
    question: &QuestionSpec,
) -> Result<(), GradingError> {
    if extraction.text.trim().is_empty() {
        return Err(GradingError::Validation("extracted text is empty".to_string()));
    }
    question.validate().map_err(|err| GradingError::Validation(err.to_string()))
}

/// Clamp into `[0, total]`, flag low confidence for review and derive the
/// grade band. Consensus disagreement flags set earlier are kept.
pub(crate) fn apply_grading_rules(
    mut result: ScoreResult,
    question: &QuestionSpec,
    confidence_threshold: f64,
) -> ScoreResult {
    let total = question.total_score;
    result.score = result.score.clamp(0.0, total);
    result.max_score = total;
    result.needs_review = result.needs_review || result.confidence < confidence_threshold;
    result.grade_level = GradeLevel::from_percentage(percentage(result.score, total));
    result
}
