// Content classifier - decides whether content may be relayed directly or
// needs moderator review.
//
// Two independent detectors:
// - block-term matching against the latest published snapshot
//   (case-insensitive substring)
// - link/mention token patterns
//
// Either one flags the content. Classification is deterministic for a given
// (content, snapshot) pair and never performs I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

static LINK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(https?://|www\.|t\.me/)").expect("link pattern is valid"));
static MENTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\w+").expect("mention pattern is valid"));

/// Why content was flagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagReason {
    /// Content contains a configured block term.
    BlockedTerm(String),
    /// Content contains a URL-like token.
    Link,
    /// Content mentions another participant.
    Mention,
}

impl std::fmt::Display for FlagReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagReason::BlockedTerm(term) => write!(f, "blocked term \"{}\"", term),
            FlagReason::Link => write!(f, "link"),
            FlagReason::Mention => write!(f, "mention"),
        }
    }
}

/// Classification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Flagged(FlagReason),
}

impl Verdict {
    pub fn is_flagged(&self) -> bool {
        matches!(self, Verdict::Flagged(_))
    }
}

/// An immutable, point-in-time set of block terms.
///
/// Built once by a loader, then published wholesale. Terms are normalized to
/// lowercase at construction so the match path only lowercases the content.
#[derive(Debug, Clone, Default)]
pub struct TermSnapshot {
    terms: Vec<String>,
}

impl TermSnapshot {
    pub fn new(terms: impl IntoIterator<Item = String>) -> Self {
        let mut normalized: Vec<String> = terms
            .into_iter()
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        Self { terms: normalized }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// First term contained in `lowered`, if any. `lowered` must already be
    /// lowercase.
    fn first_match(&self, lowered: &str) -> Option<&str> {
        self.terms
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
    }
}

/// Classifies renderable text against the published snapshot plus pattern
/// detectors.
///
/// The snapshot cell holds an `Arc` that readers clone out; publishing swaps
/// the pointer wholesale, so classify() never waits on a loader mid-parse.
pub struct ClassifierService {
    snapshot: RwLock<Option<Arc<TermSnapshot>>>,
    degraded_warned: AtomicBool,
}

impl ClassifierService {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(None),
            degraded_warned: AtomicBool::new(false),
        }
    }

    /// Publish a new block-term snapshot, replacing the previous one.
    pub fn publish(&self, snapshot: TermSnapshot) {
        let count = snapshot.len();
        *self
            .snapshot
            .write()
            .expect("block-term snapshot lock poisoned") = Some(Arc::new(snapshot));
        tracing::info!(terms = count, "published block-term snapshot");
    }

    /// The most recently published snapshot, if any loader has run yet.
    pub fn current_snapshot(&self) -> Option<Arc<TermSnapshot>> {
        self.snapshot
            .read()
            .expect("block-term snapshot lock poisoned")
            .clone()
    }

    /// Classify one piece of renderable text.
    pub fn classify(&self, text: &str) -> Verdict {
        match self.current_snapshot() {
            Some(snapshot) => {
                let lowered = text.to_lowercase();
                if let Some(term) = snapshot.first_match(&lowered) {
                    return Verdict::Flagged(FlagReason::BlockedTerm(term.to_string()));
                }
            }
            None => {
                // Degraded: no snapshot published yet. Pattern detection
                // still runs, so the pipeline keeps working.
                if !self.degraded_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "no block-term snapshot published; running pattern-only classification"
                    );
                }
            }
        }

        if LINK_PATTERN.is_match(text) {
            return Verdict::Flagged(FlagReason::Link);
        }
        if MENTION_PATTERN.is_match(text) {
            return Verdict::Flagged(FlagReason::Mention);
        }

        Verdict::Clean
    }
}

impl Default for ClassifierService {
    fn default() -> Self {
        Self::new()
    }
}
