use crate::schemas::grading::{GradeLevel, ScoreComparison, ScoreResult};

pub(crate) const MAX_CONSENSUS_CONFIDENCE: f64 = 0.95;
const AGREEMENT_TOLERANCE: f64 = 1.0;
const REVIEW_DIFFERENCE: f64 = 2.0;
const CONSISTENCY_SCALE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Consensus {
    pub(crate) score: f64,
    pub(crate) confidence: f64,
    pub(crate) score_difference: f64,
    pub(crate) confidence_difference: f64,
    pub(crate) needs_review: bool,
}

/// Reconcile two scores. Beyond one point of disagreement the primary score
/// is kept as-is.
pub(crate) fn reconcile(
    primary: &ScoreResult,
    secondary: &ScoreResult,
    confidence_threshold: f64,
) -> Consensus {
    let score_difference = (primary.score - secondary.score).abs();
    let score = if score_difference <= AGREEMENT_TOLERANCE {
        ((primary.score + secondary.score) / 2.0).round()
    } else {
        primary.score
    };

    let average_confidence = (primary.confidence + secondary.confidence) / 2.0;
    let consistency = 1.0 - (score_difference / CONSISTENCY_SCALE).min(1.0);
    let confidence = ((average_confidence + consistency) / 2.0).min(MAX_CONSENSUS_CONFIDENCE);

    Consensus {
        score,
        confidence,
        score_difference,
        confidence_difference: (primary.confidence - secondary.confidence).abs(),
        needs_review: score_difference > REVIEW_DIFFERENCE || confidence < confidence_threshold,
    }
}

pub(crate) fn merge(primary: ScoreResult, secondary: ScoreResult, consensus: Consensus) -> ScoreResult {
    let mut merged = primary.clone();
    merged.score = consensus.score;
    merged.confidence = consensus.confidence;
    merged.needs_review = consensus.needs_review;
    merged.grade_level = GradeLevel::from_percentage(percentage(consensus.score, merged.max_score));
    merged.model = format!("{}+{}", primary.model, secondary.model);
    merged.comparison = Some(ScoreComparison {
        score_difference: consensus.score_difference,
        confidence_difference: consensus.confidence_difference,
        consensus_score: consensus.score,
    });
    merged.primary = Some(Box::new(primary));
    merged.secondary = Some(Box::new(secondary));
    merged
}

pub(crate) fn percentage(score: f64, max_score: f64) -> f64 {
    if max_score <= 0.0 {
        0.0
    } else {
        score / max_score * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::score_result;

    #[test]
    fn equal_scores_agree() {
        let consensus = reconcile(&score_result(7.0, 0.9), &score_result(7.0, 0.9), 0.8);
        assert_eq!(consensus.score, 7.0);
        assert_eq!(consensus.score_difference, 0.0);
        assert!((consensus.confidence - 0.95).abs() < 1e-9);
        assert!(!consensus.needs_review);
    }

    #[test]
    fn one_point_difference_averages() {
        let consensus = reconcile(&score_result(7.0, 0.9), &score_result(8.0, 0.9), 0.8);
        assert_eq!(consensus.score, (7.5f64).round());
        assert_eq!(consensus.score, 8.0);
        // (0.9 + 0.9) / 2 = 0.9, consistency 0.9 -> 0.9
        assert!((consensus.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn large_difference_keeps_primary() {
        let consensus = reconcile(&score_result(9.0, 0.9), &score_result(4.0, 0.9), 0.8);
        assert_eq!(consensus.score, 9.0);
        assert_eq!(consensus.score_difference, 5.0);
        // consistency 0.5 -> (0.9 + 0.5) / 2 = 0.7
        assert!((consensus.confidence - 0.7).abs() < 1e-9);
        assert!(consensus.needs_review);
    }

    #[test]
    fn difference_of_two_without_low_confidence_skips_review() {
        let consensus = reconcile(&score_result(6.0, 1.0), &score_result(8.0, 1.0), 0.8);
        assert_eq!(consensus.score, 6.0);
        assert!((consensus.confidence - 0.9).abs() < 1e-9);
        assert!(!consensus.needs_review);
    }

    #[test]
    fn low_confidence_requires_review() {
        let consensus = reconcile(&score_result(5.0, 0.4), &score_result(5.0, 0.5), 0.8);
        assert!(consensus.needs_review);
    }

    #[test]
    fn merge_keeps_both_passes() {
        let primary = score_result(7.0, 0.9);
        let secondary = score_result(8.0, 0.8);
        let consensus = reconcile(&primary, &secondary, 0.8);
        let merged = merge(primary.clone(), secondary.clone(), consensus);
        assert_eq!(merged.score, 8.0);
        assert_eq!(merged.primary.as_deref(), Some(&primary));
        assert_eq!(merged.secondary.as_deref(), Some(&secondary));
        let comparison = merged.comparison.expect("comparison");
        assert_eq!(comparison.consensus_score, 8.0);
        assert!((comparison.confidence_difference - 0.1).abs() < 1e-9);
    }
}
