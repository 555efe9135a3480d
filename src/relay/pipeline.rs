// Relay pipeline - the entry points the transport layer calls into.
//
// One instance of the pipeline runs per process; each inbound message flows
// through it independently (resolve handle -> classify -> dispatch or
// submit). The transport itself (webhooks, long polling, whatever) lives
// outside this crate.

use crate::core::anonymizer::AnonymizerService;
use crate::core::classifier::{ClassifierService, TermSnapshot, Verdict};
use crate::core::content::MessageContent;
use crate::core::dispatch::{DispatchError, DispatcherService};
use crate::core::moderation::{ConsensusError, ConsensusService, DecisionOutcome, ModeratorAction};
use crate::core::registry::RegistryService;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// A membership transition reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Joined,
    Departed,
}

/// What the pipeline did with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Clean content, forwarded under the pseudonymous handle.
    Relayed { connection_id: u64, delivered: bool },
    /// Flagged content, queued for moderator review.
    HeldForReview { submission_id: u64 },
    /// Sender is a moderator and moderator traffic is exempt; the transport
    /// leaves the original message alone.
    ExemptPassthrough,
    /// Content with no renderable projection; dropped.
    Ignored,
}

/// Behavior knobs the source system left inconsistent.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Whether messages from current moderators bypass anonymization and
    /// classification entirely.
    pub exempt_moderators: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exempt_moderators: true,
        }
    }
}

/// The anonymous relay pipeline.
pub struct RelayPipeline {
    config: PipelineConfig,
    anonymizer: Arc<AnonymizerService>,
    classifier: Arc<ClassifierService>,
    registry: Arc<RegistryService>,
    consensus: Arc<ConsensusService>,
    dispatcher: Arc<DispatcherService>,
}

impl RelayPipeline {
    pub fn new(
        config: PipelineConfig,
        anonymizer: Arc<AnonymizerService>,
        classifier: Arc<ClassifierService>,
        registry: Arc<RegistryService>,
        consensus: Arc<ConsensusService>,
        dispatcher: Arc<DispatcherService>,
    ) -> Self {
        Self {
            config,
            anonymizer,
            classifier,
            registry,
            consensus,
            dispatcher,
        }
    }

    /// Entry point for inbound content.
    ///
    /// `inbound_connection_id` identifies the connection the content arrived
    /// on. It is logged but deliberately never influences the outbound
    /// connection choice.
    pub async fn on_inbound_message(
        &self,
        source_id: u64,
        content: MessageContent,
        inbound_connection_id: u64,
    ) -> Result<InboundOutcome, PipelineError> {
        if self.config.exempt_moderators && self.registry.contains(source_id) {
            tracing::debug!(source_id, "moderator message; passing through untouched");
            return Ok(InboundOutcome::ExemptPassthrough);
        }

        let Some(text) = content.render_text() else {
            tracing::debug!(
                source_id,
                kind = content.kind_label(),
                "content has no renderable projection; ignoring"
            );
            return Ok(InboundOutcome::Ignored);
        };

        let handle = self.anonymizer.resolve(source_id);

        match self.classifier.classify(&text) {
            Verdict::Clean => {
                let report = self.dispatcher.dispatch(&handle, &text).await?;
                tracing::debug!(
                    handle = %handle,
                    inbound_connection_id,
                    outbound_connection_id = report.connection_id,
                    "relayed clean content"
                );
                Ok(InboundOutcome::Relayed {
                    connection_id: report.connection_id,
                    delivered: report.delivered,
                })
            }
            Verdict::Flagged(reason) => {
                tracing::info!(
                    handle = %handle,
                    reason = %reason,
                    "content flagged; holding for review"
                );
                let submission_id = self.consensus.submit(source_id, &handle, &content).await;
                Ok(InboundOutcome::HeldForReview { submission_id })
            }
        }
    }

    /// Entry point for a moderator's approve/reject action.
    pub async fn on_moderator_action(
        &self,
        submission_id: u64,
        moderator_id: u64,
        action: ModeratorAction,
    ) -> Result<DecisionOutcome, PipelineError> {
        Ok(self
            .consensus
            .decide(submission_id, moderator_id, action)
            .await?)
    }

    /// Entry point for membership changes. Departure releases the handle.
    pub fn on_membership_change(&self, source_id: u64, status: MembershipStatus) {
        if status == MembershipStatus::Departed {
            self.anonymizer.release(source_id);
        }
    }

    /// Entry point for block-term list updates: publish the new snapshot
    /// wholesale.
    pub fn on_block_list_updated(&self, terms: Vec<String>) {
        self.classifier.publish(TermSnapshot::new(terms));
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::anonymizer::AnonymizerConfig;
    use crate::core::dispatch::{ChannelConnection, DeliveryError, DeliverySender};
    use crate::core::moderation::{
        ConsensusConfig, NotifyError, PromptNotifier, ReviewPrompt, SubmissionState,
    };
    use crate::core::registry::{MembershipProvider, RegistryError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct FixedProvider(Vec<u64>);

    #[async_trait]
    impl MembershipProvider for FixedProvider {
        async fn fetch_moderators(&self) -> Result<Vec<u64>, RegistryError> {
            Ok(self.0.clone())
        }
    }

    struct RecordingSender {
        sent: Mutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl DeliverySender for RecordingSender {
        async fn send(&self, connection_id: u64, rendered: &str) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .unwrap()
                .push((connection_id, rendered.to_string()));
            Ok(())
        }
    }

    struct RecordingNotifier {
        next_ref: AtomicU64,
        prompts: Mutex<Vec<(u64, ReviewPrompt)>>,
        updates: Mutex<Vec<(u64, SubmissionState)>>,
    }

    #[async_trait]
    impl PromptNotifier for RecordingNotifier {
        async fn notify(
            &self,
            moderator_id: u64,
            prompt: &ReviewPrompt,
        ) -> Result<u64, NotifyError> {
            self.prompts
                .lock()
                .unwrap()
                .push((moderator_id, prompt.clone()));
            Ok(self.next_ref.fetch_add(1, Ordering::Relaxed))
        }

        async fn update(
            &self,
            moderator_id: u64,
            _prompt_ref: u64,
            resolution: SubmissionState,
        ) -> Result<(), NotifyError> {
            self.updates.lock().unwrap().push((moderator_id, resolution));
            Ok(())
        }
    }

    struct Rig {
        pipeline: RelayPipeline,
        sender: Arc<RecordingSender>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn rig(moderators: Vec<u64>, terms: &[&str]) -> Rig {
        let anonymizer = Arc::new(AnonymizerService::new(AnonymizerConfig::default()));
        let classifier = Arc::new(ClassifierService::new());
        classifier.publish(TermSnapshot::new(terms.iter().map(|t| t.to_string())));

        let registry = Arc::new(RegistryService::new(Arc::new(FixedProvider(moderators))));
        registry.refresh().await.unwrap();

        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        });
        let connections = (0..3u64)
            .map(|id| ChannelConnection::new(id, format!("token-{}", id)))
            .collect();
        let dispatcher = Arc::new(DispatcherService::new(connections, sender.clone()));

        let notifier = Arc::new(RecordingNotifier {
            next_ref: AtomicU64::new(1),
            prompts: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        });
        let consensus = Arc::new(ConsensusService::new(
            ConsensusConfig::default(),
            registry.clone(),
            notifier.clone(),
            dispatcher.clone(),
        ));

        Rig {
            pipeline: RelayPipeline::new(
                PipelineConfig::default(),
                anonymizer,
                classifier,
                registry,
                consensus,
                dispatcher,
            ),
            sender,
            notifier,
        }
    }

    #[tokio::test]
    async fn clean_content_relays_immediately_under_a_handle() {
        let r = rig(vec![100], &["spam"]).await;

        let outcome = r
            .pipeline
            .on_inbound_message(1, MessageContent::text("hello"), 7)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            InboundOutcome::Relayed {
                delivered: true,
                ..
            }
        ));
        let sent = r.sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let rendered = &sent[0].1;
        assert!(rendered.starts_with("User"));
        assert!(rendered.ends_with(": hello"));
        // The real sender identity never reaches the outbound side.
        assert!(!rendered.contains('1'));
    }

    #[tokio::test]
    async fn outbound_connection_is_decorrelated_from_inbound() {
        let r = rig(vec![100], &[]).await;

        // Everything arrives on inbound connection 2; outbound still walks
        // the pool round robin.
        let mut outbound = Vec::new();
        for _ in 0..6 {
            match r
                .pipeline
                .on_inbound_message(1, MessageContent::text("hi"), 2)
                .await
                .unwrap()
            {
                InboundOutcome::Relayed { connection_id, .. } => outbound.push(connection_id),
                other => panic!("expected relay, got {:?}", other),
            }
        }

        assert_eq!(outbound, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn moderator_traffic_passes_through_untouched() {
        let r = rig(vec![100], &["spam"]).await;

        let outcome = r
            .pipeline
            .on_inbound_message(100, MessageContent::text("spam http://x.example"), 0)
            .await
            .unwrap();

        assert_eq!(outcome, InboundOutcome::ExemptPassthrough);
        assert!(r.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_content_is_ignored() {
        let r = rig(vec![100], &[]).await;

        let outcome = r
            .pipeline
            .on_inbound_message(1, MessageContent::Unsupported, 0)
            .await
            .unwrap();

        assert_eq!(outcome, InboundOutcome::Ignored);
    }

    #[tokio::test]
    async fn departure_releases_the_handle_and_rejoin_mints_a_new_one() {
        let r = rig(vec![100], &[]).await;

        r.pipeline
            .on_inbound_message(1, MessageContent::text("first"), 0)
            .await
            .unwrap();
        r.pipeline.on_membership_change(1, MembershipStatus::Departed);
        r.pipeline
            .on_inbound_message(1, MessageContent::text("second"), 0)
            .await
            .unwrap();

        let sent = r.sender.sent.lock().unwrap();
        let handle_of = |rendered: &str| rendered.split(':').next().unwrap().to_string();
        assert_ne!(handle_of(&sent[0].1), handle_of(&sent[1].1));
    }

    #[tokio::test]
    async fn block_list_update_swaps_the_snapshot() {
        let r = rig(vec![100], &[]).await;

        let clean = r
            .pipeline
            .on_inbound_message(1, MessageContent::text("giveaway"), 0)
            .await
            .unwrap();
        assert!(matches!(clean, InboundOutcome::Relayed { .. }));

        r.pipeline
            .on_block_list_updated(vec!["giveaway".to_string()]);

        let flagged = r
            .pipeline
            .on_inbound_message(1, MessageContent::text("giveaway"), 0)
            .await
            .unwrap();
        assert!(matches!(flagged, InboundOutcome::HeldForReview { .. }));
    }

    /// The end-to-end scenario: flagged content, two moderators, the first
    /// approval forwards exactly once, the late reject is a no-op, and both
    /// prompts end up showing the terminal state.
    #[tokio::test]
    async fn flagged_content_flows_through_review_to_a_single_dispatch() {
        let r = rig(vec![201, 202], &[]).await;

        let outcome = r
            .pipeline
            .on_inbound_message(1, MessageContent::text("check http://spam.example"), 0)
            .await
            .unwrap();
        let InboundOutcome::HeldForReview { submission_id } = outcome else {
            panic!("expected content to be held, got {:?}", outcome);
        };

        // Nothing forwarded yet; both moderators were prompted.
        assert!(r.sender.sent.lock().unwrap().is_empty());
        assert_eq!(r.notifier.prompts.lock().unwrap().len(), 2);

        // M2 approves first.
        let first = r
            .pipeline
            .on_moderator_action(submission_id, 202, ModeratorAction::Approve)
            .await
            .unwrap();
        assert_eq!(first, DecisionOutcome::Approved { delivered: true });

        // Exactly one forwarded copy, under the handle.
        {
            let sent = r.sender.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert!(sent[0].1.ends_with(": check http://spam.example"));
        }

        // M1's later reject is informational and forwards nothing more.
        let second = r
            .pipeline
            .on_moderator_action(submission_id, 201, ModeratorAction::Reject)
            .await
            .unwrap();
        assert_eq!(second, DecisionOutcome::AlreadyResolved);
        assert_eq!(r.sender.sent.lock().unwrap().len(), 1);

        // Both prompts were updated to the terminal display state.
        let updates = r.notifier.updates.lock().unwrap();
        let mut updated: Vec<(u64, SubmissionState)> = updates.clone();
        updated.sort_by_key(|(moderator_id, _)| *moderator_id);
        assert_eq!(
            updated,
            vec![
                (201, SubmissionState::Approved),
                (202, SubmissionState::Approved)
            ]
        );
    }

    #[tokio::test]
    async fn blocked_term_is_held_for_review() {
        let r = rig(vec![201], &["casino"]).await;

        let outcome = r
            .pipeline
            .on_inbound_message(1, MessageContent::text("Visit my CASINO"), 0)
            .await
            .unwrap();

        assert!(matches!(outcome, InboundOutcome::HeldForReview { .. }));
        assert!(r.sender.sent.lock().unwrap().is_empty());
    }
}
