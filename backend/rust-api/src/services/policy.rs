use crate::models::integrity::Violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Continue,
    ForceSubmit,
}

/// Decides what a newly recorded violation means for the session.
///
/// `recorded` already contains `violation`.
pub trait ViolationPolicy: Send + Sync {
    fn evaluate(&self, violation: &Violation, recorded: &[Violation]) -> PolicyDecision;
}

/// Violations are surfaced to the candidate and kept for the sink, nothing more.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordOnly;

impl ViolationPolicy for RecordOnly {
    fn evaluate(&self, _violation: &Violation, _recorded: &[Violation]) -> PolicyDecision {
        PolicyDecision::Continue
    }
}

/// Forces submission once `limit` violations have been recorded.
#[derive(Debug, Clone, Copy)]
pub struct SubmitAfter {
    pub limit: usize,
}

impl ViolationPolicy for SubmitAfter {
    fn evaluate(&self, _violation: &Violation, recorded: &[Violation]) -> PolicyDecision {
        if recorded.len() >= self.limit.max(1) {
            PolicyDecision::ForceSubmit
        } else {
            PolicyDecision::Continue
        }
    }
}
