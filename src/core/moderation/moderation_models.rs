// Moderation domain models - the submission state machine's data.
//
// Pure domain types; the transport layer converts these to whatever its
// review UI needs.

use crate::core::content::MessageContent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Lifecycle of a flagged submission.
///
/// `Pending` is the only non-terminal state; every submission makes at most
/// one transition out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionState::Pending)
    }
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionState::Pending => write!(f, "pending"),
            SubmissionState::Approved => write!(f, "approved"),
            SubmissionState::Rejected => write!(f, "rejected"),
            SubmissionState::Expired => write!(f, "expired"),
        }
    }
}

/// A moderator's review action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeratorAction {
    Approve,
    Reject,
}

/// What a decide() call accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// This call won the transition to APPROVED; the content was handed to
    /// the dispatcher exactly once.
    Approved { delivered: bool },
    /// This call won the transition to REJECTED; the content is discarded.
    Rejected,
    /// Under `RejectPolicy::WaitForAllModerators`: the rejection was
    /// recorded but other moderators are still outstanding.
    RejectionRecorded { outstanding: usize },
    /// The submission was already terminal (or unknown). Informational, not
    /// an error; no side effect occurred.
    AlreadyResolved,
}

/// A review prompt successfully placed with one moderator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifiedPrompt {
    pub moderator_id: u64,
    /// Opaque reference the notifier hands back, used to update the prompt
    /// once the submission resolves.
    pub prompt_ref: u64,
}

/// A flagged submission tracked through the approval state machine.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub submission_id: u64,
    pub source_id: u64,
    pub handle: String,
    pub content: MessageContent,
    /// Renderable-text projection of `content`, captured at submit time.
    pub rendered: String,
    pub state: SubmissionState,
    pub created_at: DateTime<Utc>,
    /// Moderators who rejected so far (only consulted under
    /// `WaitForAllModerators`).
    pub rejections: HashSet<u64>,
    /// Every moderator whose prompt actually went out.
    pub notified: Vec<NotifiedPrompt>,
    /// Set once submit() has finished fanning out and recorded `notified`.
    /// Until then a terminal entry must stay in the table so the fan-out
    /// can fix up late prompts.
    pub prompts_recorded: bool,
}

/// What a rejection does to the rest of the review. Deployments disagree on
/// the right semantics, so it is an explicit policy choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectPolicy {
    /// The first rejection closes the submission for everyone.
    CloseImmediately,
    /// A rejection only removes that moderator's vote; the submission
    /// closes once every notified moderator has rejected. An approval still
    /// wins immediately.
    WaitForAllModerators,
}

/// Configuration for the consensus engine.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// How long a submission may stay PENDING before expiry applies.
    pub pending_ttl: Duration,
    pub reject_policy: RejectPolicy,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(15 * 60),
            reject_policy: RejectPolicy::CloseImmediately,
        }
    }
}
