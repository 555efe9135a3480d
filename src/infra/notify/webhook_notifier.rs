// Webhook-backed prompt notifier.
//
// Places review prompts with moderators by POSTing to a per-moderator URL
// (the `{moderator_id}` placeholder in the template is substituted). A
// moderator who never opened a private channel answers 4xx; that is the
// expected per-recipient failure the consensus engine logs and moves past.

use crate::core::moderation::{NotifyError, PromptNotifier, ReviewPrompt, SubmissionState};
use crate::relay::prompts::{render_resolution, render_review_prompt};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Serialize)]
struct PromptPayload<'a> {
    prompt_ref: u64,
    submission_id: u64,
    text: &'a str,
    actions: &'a [&'a str],
}

#[derive(Serialize)]
struct UpdatePayload<'a> {
    prompt_ref: u64,
    text: &'a str,
}

pub struct WebhookPromptNotifier {
    client: Client,
    /// URL template containing a `{moderator_id}` placeholder.
    url_template: String,
    next_ref: AtomicU64,
}

impl WebhookPromptNotifier {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url_template: url_template.into(),
            next_ref: AtomicU64::new(1),
        }
    }

    fn url_for(&self, moderator_id: u64) -> String {
        self.url_template
            .replace("{moderator_id}", &moderator_id.to_string())
    }
}

#[async_trait]
impl PromptNotifier for WebhookPromptNotifier {
    async fn notify(&self, moderator_id: u64, prompt: &ReviewPrompt) -> Result<u64, NotifyError> {
        let prompt_ref = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let payload = PromptPayload {
            prompt_ref,
            submission_id: prompt.submission_id,
            text: &render_review_prompt(prompt),
            actions: &["approve", "reject"],
        };

        self.client
            .post(self.url_for(moderator_id))
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError(e.to_string()))?;

        Ok(prompt_ref)
    }

    async fn update(
        &self,
        moderator_id: u64,
        prompt_ref: u64,
        resolution: SubmissionState,
    ) -> Result<(), NotifyError> {
        let payload = UpdatePayload {
            prompt_ref,
            text: render_resolution(resolution),
        };

        self.client
            .post(self.url_for(moderator_id))
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError(e.to_string()))?;

        Ok(())
    }
}
