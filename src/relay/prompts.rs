// Display text for moderator review prompts.
//
// Kept apart from the consensus engine so the decision logic never cares
// what a prompt looks like on screen.

use crate::core::moderation::{ReviewPrompt, SubmissionState};

/// Body of a review prompt as shown to a moderator.
pub fn render_review_prompt(prompt: &ReviewPrompt) -> String {
    format!(
        "{} sent content held for review:\n{}\nForward it?",
        prompt.handle, prompt.text
    )
}

/// Replacement text once a submission resolves.
pub fn render_resolution(state: SubmissionState) -> &'static str {
    match state {
        SubmissionState::Approved => "Approved and forwarded",
        SubmissionState::Rejected => "Rejected",
        SubmissionState::Expired => "Expired unreviewed",
        SubmissionState::Pending => "Awaiting review",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_handle_and_content() {
        let prompt = ReviewPrompt {
            submission_id: 7,
            handle: "UserK7Q2MX".to_string(),
            text: "check http://spam.example".to_string(),
        };

        let rendered = render_review_prompt(&prompt);

        assert!(rendered.starts_with("UserK7Q2MX sent content"));
        assert!(rendered.contains("check http://spam.example"));
        assert!(rendered.ends_with("Forward it?"));
    }

    #[test]
    fn every_terminal_state_has_display_text() {
        assert_eq!(
            render_resolution(SubmissionState::Approved),
            "Approved and forwarded"
        );
        assert_eq!(render_resolution(SubmissionState::Rejected), "Rejected");
        assert_eq!(
            render_resolution(SubmissionState::Expired),
            "Expired unreviewed"
        );
    }
}
