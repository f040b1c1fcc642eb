use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Done,
    Current,
    Pending,
}

/// Position-based progress: reaching the last question reads 100% no matter
/// how many answers exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub current_question_number: usize,
    pub total_questions: usize,
    pub answered_count: usize,
    pub percentage: f64,
    pub statuses: Vec<QuestionStatus>,
}

impl ProgressSnapshot {
    /// `current_question_number` is 1-based.
    pub fn compute(
        current_question_number: usize,
        total_questions: usize,
        answered_count: usize,
    ) -> Self {
        let percentage = if total_questions == 0 {
            0.0
        } else {
            let current = current_question_number.min(total_questions);
            current as f64 / total_questions as f64 * 100.0
        };

        let statuses = (0..total_questions)
            .map(|i| {
                if i + 1 < current_question_number {
                    QuestionStatus::Done
                } else if i + 1 == current_question_number {
                    QuestionStatus::Current
                } else {
                    QuestionStatus::Pending
                }
            })
            .collect();

        Self {
            current_question_number,
            total_questions,
            answered_count,
            percentage,
            statuses,
        }
    }
}
