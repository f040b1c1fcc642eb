//! Maps a question's declared type to a capture surface and turns
//! candidate input into the next answer value.

use serde::Serialize;

use crate::models::{Question, QuestionKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceRow {
    pub index: usize,
    pub text: String,
    pub selected: bool,
}

/// What the candidate sees and edits for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureSurface {
    Choice { rows: Vec<ChoiceRow> },
    TextBuffer { value: String },
    CodeEditor { value: String },
    Transcript { value: String },
}

/// A single interaction with a capture surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput {
    Select { option: usize },
    Edit { text: String },
}

/// Builds the surface for `question` given its current answer, if any.
pub fn render(question: &Question, answer: Option<&str>) -> CaptureSurface {
    match &question.kind {
        QuestionKind::SingleChoice { options } => CaptureSurface::Choice {
            rows: options
                .iter()
                .enumerate()
                .map(|(index, text)| ChoiceRow {
                    index,
                    text: text.clone(),
                    selected: answer == Some(text.as_str()),
                })
                .collect(),
        },
        QuestionKind::FreeText => CaptureSurface::TextBuffer {
            value: answer.unwrap_or_default().to_string(),
        },
        // Starter content only seeds an unanswered question; an answer that
        // was cleared to empty stays empty.
        QuestionKind::Code { starter } => CaptureSurface::CodeEditor {
            value: match answer {
                Some(existing) => existing.to_string(),
                None => starter.clone().unwrap_or_default(),
            },
        },
        QuestionKind::SimulatedVideo => CaptureSurface::Transcript {
            value: answer.unwrap_or_default().to_string(),
        },
    }
}

/// Applies `input` to `question`, returning the new answer value.
///
/// Inputs that do not fit the question type (an edit on a choice list, a
/// selection on a text buffer, an out-of-range option) yield `None` and
/// leave the answer untouched.
pub fn capture(question: &Question, input: CaptureInput) -> Option<String> {
    match (&question.kind, input) {
        (QuestionKind::SingleChoice { options }, CaptureInput::Select { option }) => {
            options.get(option).cloned()
        }
        (
            QuestionKind::FreeText | QuestionKind::Code { .. } | QuestionKind::SimulatedVideo,
            CaptureInput::Edit { text },
        ) => Some(text),
        _ => None,
    }
}
