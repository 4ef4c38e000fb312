use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub(crate) enum GradingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("OCR engine error: {0}")]
    OcrEngine(String),
    #[error("unexpected AI response format: {0}")]
    ResponseFormat(String),
    #[error("scoring service error: {0}")]
    ScoringService(String),
    #[error("invalid batch state: {0}")]
    InvalidState(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GradingError {
    /// Input problems are never worth another attempt.
    pub(crate) fn is_retryable(&self) -> bool {
        !matches!(
            self,
            GradingError::Validation(_) | GradingError::InvalidImage(_) | GradingError::InvalidState(_)
        )
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            GradingError::Validation(_) => "validation",
            GradingError::InvalidImage(_) => "invalid_image",
            GradingError::OcrEngine(_) => "ocr_engine",
            GradingError::ResponseFormat(_) => "response_format",
            GradingError::ScoringService(_) => "scoring_service",
            GradingError::InvalidState(_) => "invalid_state",
            GradingError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_not_retryable() {
        assert!(!GradingError::Validation("x".into()).is_retryable());
        assert!(!GradingError::InvalidImage("x".into()).is_retryable());
        assert!(GradingError::OcrEngine("x".into()).is_retryable());
        assert!(GradingError::ScoringService("x".into()).is_retryable());
    }

    #[test]
    fn display_includes_kind_prefix() {
        let err = GradingError::ResponseFormat("no JSON object found".into());
        assert_eq!(err.to_string(), "unexpected AI response format: no JSON object found");
        assert_eq!(err.kind(), "response_format");
    }
}
