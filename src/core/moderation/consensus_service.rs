// Consensus engine - holds flagged submissions and resolves the first
// decisive moderator action exactly once.
//
// The hard invariant lives here: a submission makes AT MOST ONE transition
// out of PENDING, and an approval hands content to the dispatcher AT MOST
// ONCE, no matter how many moderators (or the expiry sweep) race on it.
//
// Enforcement: the submission table is a DashMap and every state transition
// happens under the entry's exclusive guard - per-key serialization, no
// engine-wide lock. Guards are never held across an await: the
// compare-and-swap is synchronous, and side effects (dispatch, prompt
// updates) run from a clone captured by whichever caller won.

use super::moderation_models::{
    ConsensusConfig, DecisionOutcome, ModeratorAction, NotifiedPrompt, PendingSubmission,
    RejectPolicy, SubmissionState,
};
use crate::core::content::MessageContent;
use crate::core::dispatch::{DispatchError, DispatcherService};
use crate::core::registry::RegistryService;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ConsensusError {
    /// decide() from someone outside the current moderator snapshot. No
    /// state change happened.
    #[error("moderator {moderator_id} is not authorized to review submissions")]
    Unauthorized { moderator_id: u64 },

    /// The approval won but there was nothing to deliver over. The terminal
    /// transition stands; the caller learns the content went nowhere.
    #[error(transparent)]
    Undeliverable(#[from] DispatchError),
}

/// Failure to reach one moderator's private channel. Logged and swallowed
/// per recipient.
#[derive(Debug, Error)]
#[error("prompt notification failed: {0}")]
pub struct NotifyError(pub String);

// ============================================================================
// NOTIFIER TRAIT (PORT)
// ============================================================================

/// A review request as shown to one moderator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewPrompt {
    pub submission_id: u64,
    pub handle: String,
    pub text: String,
}

/// Trait for placing review prompts with moderators.
///
/// Every call is independent and best-effort: one moderator without a
/// reachable private channel must never block the others or the decision.
#[async_trait]
pub trait PromptNotifier: Send + Sync {
    /// Place a review prompt with `moderator_id`. Returns an opaque
    /// reference used later to update the prompt's display.
    async fn notify(&self, moderator_id: u64, prompt: &ReviewPrompt) -> Result<u64, NotifyError>;

    /// Update a previously placed prompt to show the terminal state.
    async fn update(
        &self,
        moderator_id: u64,
        prompt_ref: u64,
        resolution: SubmissionState,
    ) -> Result<(), NotifyError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Clone of the fields needed for post-transition side effects, captured by
/// the caller that won the compare-and-swap.
struct ResolvedSubmission {
    submission_id: u64,
    state: SubmissionState,
    handle: String,
    rendered: String,
    notified: Vec<NotifiedPrompt>,
    prompts_recorded: bool,
}

/// The moderation queue and its decision state machine.
pub struct ConsensusService {
    config: ConsensusConfig,
    registry: Arc<RegistryService>,
    notifier: Arc<dyn PromptNotifier>,
    dispatcher: Arc<DispatcherService>,
    submissions: DashMap<u64, PendingSubmission>,
    next_id: AtomicU64,
}

impl ConsensusService {
    pub fn new(
        config: ConsensusConfig,
        registry: Arc<RegistryService>,
        notifier: Arc<dyn PromptNotifier>,
        dispatcher: Arc<DispatcherService>,
    ) -> Self {
        Self {
            config,
            registry,
            notifier,
            dispatcher,
            submissions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue flagged content for review and fan out one prompt per
    /// moderator in the current registry snapshot.
    ///
    /// Notifications are sequential but individually best-effort; every
    /// prompt that actually went out is recorded against the submission so
    /// it can be updated when the submission resolves.
    pub async fn submit(
        &self,
        source_id: u64,
        handle: &str,
        content: &MessageContent,
    ) -> u64 {
        let submission_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rendered = content.render_text().unwrap_or_default();

        self.submissions.insert(
            submission_id,
            PendingSubmission {
                submission_id,
                source_id,
                handle: handle.to_string(),
                content: content.clone(),
                rendered: rendered.clone(),
                state: SubmissionState::Pending,
                created_at: Utc::now(),
                rejections: HashSet::new(),
                notified: Vec::new(),
                prompts_recorded: false,
            },
        );

        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            tracing::warn!(
                submission_id,
                "no moderators in current snapshot; submission will sit until expiry"
            );
        }

        let prompt = ReviewPrompt {
            submission_id,
            handle: handle.to_string(),
            text: rendered,
        };
        let mut notified = Vec::new();
        for moderator_id in snapshot.ids() {
            match self.notifier.notify(moderator_id, &prompt).await {
                Ok(prompt_ref) => notified.push(NotifiedPrompt {
                    moderator_id,
                    prompt_ref,
                }),
                Err(err) => tracing::warn!(
                    submission_id,
                    moderator_id,
                    error = %err,
                    "could not place review prompt"
                ),
            }
        }

        // A decision may already have landed while prompts were going out.
        // In that case the decider saw an empty notified list, so the
        // prompts placed above are updated here instead.
        let resolved_early = {
            match self.submissions.get_mut(&submission_id) {
                Some(mut entry) if !entry.state.is_terminal() => {
                    entry.notified = std::mem::take(&mut notified);
                    entry.prompts_recorded = true;
                    None
                }
                Some(entry) => Some(entry.state),
                None => Some(SubmissionState::Expired),
            }
        };
        if let Some(state) = resolved_early {
            for target in &notified {
                self.update_prompt(target, state).await;
            }
            self.submissions.remove(&submission_id);
        }

        tracing::info!(submission_id, handle, "submission queued for review");
        submission_id
    }

    /// Apply one moderator's decision.
    ///
    /// The winning call (the one whose compare-and-swap moves the entry out
    /// of PENDING) performs the side effects: dispatch on approval, then a
    /// best-effort update of every recorded prompt. Losing calls get
    /// `AlreadyResolved` and do nothing.
    pub async fn decide(
        &self,
        submission_id: u64,
        moderator_id: u64,
        action: ModeratorAction,
    ) -> Result<DecisionOutcome, ConsensusError> {
        if !self.registry.contains(moderator_id) {
            return Err(ConsensusError::Unauthorized { moderator_id });
        }

        // Compare-and-swap under the entry guard. No await in this block.
        let won = {
            let Some(mut entry) = self.submissions.get_mut(&submission_id) else {
                return Ok(DecisionOutcome::AlreadyResolved);
            };
            if entry.state.is_terminal() {
                return Ok(DecisionOutcome::AlreadyResolved);
            }

            match action {
                ModeratorAction::Approve => {
                    entry.state = SubmissionState::Approved;
                    capture(&entry)
                }
                ModeratorAction::Reject => match self.config.reject_policy {
                    RejectPolicy::CloseImmediately => {
                        entry.state = SubmissionState::Rejected;
                        capture(&entry)
                    }
                    RejectPolicy::WaitForAllModerators => {
                        entry.rejections.insert(moderator_id);
                        let outstanding = entry
                            .notified
                            .iter()
                            .filter(|n| !entry.rejections.contains(&n.moderator_id))
                            .count();
                        if entry.notified.is_empty() || outstanding > 0 {
                            return Ok(DecisionOutcome::RejectionRecorded { outstanding });
                        }
                        entry.state = SubmissionState::Rejected;
                        capture(&entry)
                    }
                },
            }
        };

        tracing::info!(
            submission_id,
            moderator_id,
            state = %won.state,
            "submission resolved"
        );

        let mut delivered = false;
        let dispatch_failure = if won.state == SubmissionState::Approved {
            match self.dispatcher.dispatch(&won.handle, &won.rendered).await {
                Ok(report) => {
                    delivered = report.delivered;
                    None
                }
                Err(err) => Some(err),
            }
        } else {
            None
        };

        self.update_prompts(&won).await;
        self.drop_if_recorded(&won);

        if let Some(err) = dispatch_failure {
            return Err(err.into());
        }
        Ok(match won.state {
            SubmissionState::Approved => DecisionOutcome::Approved { delivered },
            _ => DecisionOutcome::Rejected,
        })
    }

    /// Expire one submission if it is still PENDING.
    ///
    /// Same compare-and-swap as decide(), so a decide racing an in-flight
    /// expire resolves exactly once either way.
    pub async fn expire(&self, submission_id: u64) -> bool {
        let won = {
            let Some(mut entry) = self.submissions.get_mut(&submission_id) else {
                return false;
            };
            if entry.state.is_terminal() {
                return false;
            }
            entry.state = SubmissionState::Expired;
            capture(&entry)
        };

        tracing::info!(submission_id, "submission expired unreviewed");
        self.update_prompts(&won).await;
        self.drop_if_recorded(&won);
        true
    }

    /// Expire every submission past the configured TTL. Returns how many
    /// expired. Also drops any leftover terminal entries, as a backstop for
    /// the rare case where neither the decider nor the fan-out could.
    pub async fn expire_overdue(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.config.pending_ttl)
            .unwrap_or(chrono::Duration::MAX);
        // A TTL beyond the representable time range means nothing can be
        // overdue yet.
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };

        let overdue: Vec<u64> = self
            .submissions
            .iter()
            .filter(|entry| entry.state == SubmissionState::Pending && entry.created_at <= cutoff)
            .map(|entry| entry.submission_id)
            .collect();

        let mut expired = 0;
        for submission_id in overdue {
            if self.expire(submission_id).await {
                expired += 1;
            }
        }

        self.submissions.retain(|_, entry| !entry.state.is_terminal());
        expired
    }

    /// Number of submissions still awaiting review.
    pub fn pending_count(&self) -> usize {
        self.submissions
            .iter()
            .filter(|entry| entry.state == SubmissionState::Pending)
            .count()
    }

    /// Current view of one submission, if it has not been swept yet.
    pub fn submission(&self, submission_id: u64) -> Option<PendingSubmission> {
        self.submissions
            .get(&submission_id)
            .map(|entry| entry.clone())
    }

    /// Best-effort update of every recorded prompt to the terminal state.
    async fn update_prompts(&self, resolved: &ResolvedSubmission) {
        for target in &resolved.notified {
            self.update_prompt(target, resolved.state).await;
        }
    }

    /// Remove a resolved entry from the active table.
    ///
    /// Skipped while submit()'s fan-out is still in flight (the entry's
    /// notified list is not recorded yet); the fan-out's own fix-up removes
    /// it in that case.
    fn drop_if_recorded(&self, resolved: &ResolvedSubmission) {
        if resolved.prompts_recorded {
            self.submissions.remove(&resolved.submission_id);
        }
    }

    async fn update_prompt(&self, target: &NotifiedPrompt, state: SubmissionState) {
        if let Err(err) = self
            .notifier
            .update(target.moderator_id, target.prompt_ref, state)
            .await
        {
            tracing::warn!(
                moderator_id = target.moderator_id,
                prompt_ref = target.prompt_ref,
                error = %err,
                "could not update review prompt"
            );
        }
    }
}

fn capture(entry: &PendingSubmission) -> ResolvedSubmission {
    ResolvedSubmission {
        submission_id: entry.submission_id,
        state: entry.state,
        handle: entry.handle.clone(),
        rendered: entry.rendered.clone(),
        notified: entry.notified.clone(),
        prompts_recorded: entry.prompts_recorded,
    }
}

// ============================================================================
// TESTS
// ============================================================================
