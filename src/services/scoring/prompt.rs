use crate::schemas::grading::QuestionSpec;

pub(crate) const GRADING_SYSTEM_PROMPT: &str = "You are an experienced teacher grading handwritten student answers. \
Grade strictly against the standard answer and the criteria you are given, and reply with JSON only.";

const RUBRIC: &str = "Weighting:
- Correctness of the final result: 40%
- Solution process and reasoning: 30%
- Notation and presentation: 20%
- Originality of the approach: 10%";

const OUTPUT_SCHEMA: &str = r#"Respond with exactly one JSON object and nothing else, using this schema:
{
  "score": <number between 0 and the total score>,
  "confidence": <number between 0 and 1>,
  "feedback": "<overall feedback for the student>",
  "strengths": ["<strength>"],
  "weaknesses": ["<weakness>"],
  "suggestions": ["<suggestion>"],
  "gradingDetails": [{"point": "<criterion>", "score": <number>, "comment": "<comment>"}]
}"#;

const INDEPENDENT_REVIEW: &str = "You are a second, independent grader. \
Form your own judgment from the answer itself; do not assume any earlier grading exists.";

pub(crate) fn build_grading_prompt(question: &QuestionSpec, student_text: &str) -> String {
    format!(
        "Total score: {total}\nQuestion type: {kind}\n\nStandard answer:\n{answer}\n\nGrading criteria:\n{criteria}\n\n{RUBRIC}\n\nStudent answer (OCR transcription):\n{student}\n\n{OUTPUT_SCHEMA}\n",
        total = format_score(question.total_score),
        kind = question.question_type,
        answer = question.standard_answer.trim(),
        criteria = criteria_block(question),
        student = student_text.trim(),
    )
}

pub(crate) fn build_secondary_prompt(question: &QuestionSpec, student_text: &str) -> String {
    format!("{INDEPENDENT_REVIEW}\n\n{}", build_grading_prompt(question, student_text))
}

fn criteria_block(question: &QuestionSpec) -> String {
    if question.grading_points.is_empty() {
        return format!(
            "Award credit proportionally to how much of the standard answer is correctly reproduced, up to {} points.",
            format_score(question.total_score)
        );
    }

    question
        .grading_points
        .iter()
        .enumerate()
        .map(|(idx, point)| {
            format!("{}. {} ({} points)", idx + 1, point.description, format_score(point.score))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::grading::GradingPoint;
    use crate::test_support::sample_question;

    #[test]
    fn prompt_is_deterministic_and_complete() {
        let question = sample_question("q1", 10.0);
        let first = build_grading_prompt(&question, "x = 2");
        let second = build_grading_prompt(&question, "x = 2");
        assert_eq!(first, second);
        assert!(first.contains("Total score: 10"));
        assert!(first.contains("Standard answer:\nx = 2"));
        assert!(first.contains("Award credit proportionally"));
        assert!(first.contains("Correctness of the final result: 40%"));
        assert!(first.contains("\"gradingDetails\""));
    }

    #[test]
    fn grading_points_are_listed() {
        let mut question = sample_question("q1", 5.0);
        question.grading_points = vec![
            GradingPoint { description: "Sets up equation".to_string(), score: 2.0 },
            GradingPoint { description: "Solves for x".to_string(), score: 2.5 },
        ];
        let prompt = build_grading_prompt(&question, "2x = 4");
        assert!(prompt.contains("1. Sets up equation (2 points)"));
        assert!(prompt.contains("2. Solves for x (2.5 points)"));
        assert!(!prompt.contains("Award credit proportionally"));
    }

    #[test]
    fn secondary_prompt_asks_for_independence() {
        let question = sample_question("q1", 10.0);
        let prompt = build_secondary_prompt(&question, "x = 2");
        assert!(prompt.starts_with(INDEPENDENT_REVIEW));
        assert!(prompt.ends_with(&build_grading_prompt(&question, "x = 2")));
    }
}
