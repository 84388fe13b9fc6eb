//! Initial intent label for a new run.

use crate::core::run::{RequestSnapshot, RunIntent};

/// Substrings of the latest user message that suggest an edit request.
const EDIT_MARKERS: [&str; 6] = ["modify", "change", "edit", "fix", "refactor", "optimize"];

/// Infer whether a request is a code edit or a question.
///
/// Explicit flags win over heuristics; `force_code_edit` wins over `chat_only`.
pub fn infer_intent(request: &RequestSnapshot) -> RunIntent {
    if request.force_code_edit {
        return RunIntent::CodeEdit;
    }
    if request.chat_only {
        return RunIntent::Qa;
    }
    let text = request.latest_user_message().to_lowercase();
    if request.target_file().is_some() || EDIT_MARKERS.iter().any(|marker| text.contains(marker)) {
        return RunIntent::CodeEdit;
    }
    RunIntent::Qa
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ChatMessage;

    fn request(message: &str) -> RequestSnapshot {
        RequestSnapshot {
            messages: vec![ChatMessage::user(message)],
            ..RequestSnapshot::default()
        }
    }

    #[test]
    fn force_code_edit_wins_over_chat_only() {
        let mut req = request("what is this?");
        req.force_code_edit = true;
        req.chat_only = true;
        assert_eq!(infer_intent(&req), RunIntent::CodeEdit);
    }

    #[test]
    fn chat_only_wins_over_edit_markers() {
        let mut req = request("please fix the parser");
        req.chat_only = true;
        assert_eq!(infer_intent(&req), RunIntent::Qa);
    }

    #[test]
    fn target_file_or_marker_selects_code_edit() {
        assert_eq!(infer_intent(&request("Refactor this loop")), RunIntent::CodeEdit);

        let mut req = request("what does it do?");
        req.current_file = Some("src/main.rs".to_string());
        assert_eq!(infer_intent(&req), RunIntent::CodeEdit);
    }

    #[test]
    fn plain_question_is_qa() {
        assert_eq!(infer_intent(&request("how does the loop work?")), RunIntent::Qa);
    }
}
