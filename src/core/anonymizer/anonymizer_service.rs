// Identity anonymizer - maps source identities to pseudonymous handles.
//
// This service owns the handle table:
// - First message from an unseen source mints a fresh handle
// - Repeat messages resolve to the same handle
// - Departure releases the handle and frees its code for reuse
//
// NO external I/O here - resolve() and release() are pure in-memory
// operations so the hot path never suspends.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rand::Rng;

/// Alphabet for handle codes. Skips 0/O/1/I so handles read unambiguously.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// How handles are shaped.
#[derive(Debug, Clone)]
pub struct AnonymizerConfig {
    /// Prefix prepended to every generated code, e.g. "User" -> "UserK7Q2MX".
    pub prefix: String,
    /// Length of the random code portion.
    pub code_len: usize,
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self {
            prefix: "User".to_string(),
            code_len: 6,
        }
    }
}

/// An active pseudonymous identity.
#[derive(Debug, Clone)]
pub struct Identity {
    pub source_id: u64,
    pub handle: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Assigns and recycles pseudonymous handles.
///
/// Handles are pairwise unique among active identities: a code is claimed in
/// `active_handles` before the mapping is stored, so two concurrent resolves
/// can never mint the same handle.
pub struct AnonymizerService {
    config: AnonymizerConfig,
    identities: DashMap<u64, Identity>,
    active_handles: DashSet<String>,
}

impl AnonymizerService {
    pub fn new(config: AnonymizerConfig) -> Self {
        Self {
            config,
            identities: DashMap::new(),
            active_handles: DashSet::new(),
        }
    }

    /// Return the handle for `source_id`, minting one on first contact.
    ///
    /// Also refreshes `last_active` for the identity.
    pub fn resolve(&self, source_id: u64) -> String {
        use dashmap::mapref::entry::Entry;

        match self.identities.entry(source_id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().last_active = Utc::now();
                entry.get().handle.clone()
            }
            Entry::Vacant(entry) => {
                let handle = self.claim_handle();
                let now = Utc::now();
                entry.insert(Identity {
                    source_id,
                    handle: handle.clone(),
                    created_at: now,
                    last_active: now,
                });
                tracing::debug!(source_id, handle = %handle, "minted pseudonymous handle");
                handle
            }
        }
    }

    /// Drop the mapping for `source_id` and free its code for reuse.
    ///
    /// Invoked on membership departure. A rejoin after release resolves to a
    /// brand new handle, never the original one; a message racing ahead of
    /// the release keeps the old handle until release lands. Both are
    /// accepted behavior.
    pub fn release(&self, source_id: u64) -> bool {
        match self.identities.remove(&source_id) {
            Some((_, identity)) => {
                self.active_handles.remove(&identity.handle);
                tracing::debug!(source_id, handle = %identity.handle, "released handle");
                true
            }
            None => false,
        }
    }

    /// Snapshot of the identity for `source_id`, if active.
    pub fn identity(&self, source_id: u64) -> Option<Identity> {
        self.identities.get(&source_id).map(|entry| entry.clone())
    }

    /// Number of active identities.
    pub fn active_count(&self) -> usize {
        self.identities.len()
    }

    /// Generate a code not currently in use and claim it.
    ///
    /// Expected O(1): the code space dwarfs any realistic member count. If a
    /// deployment ever saturates it anyway, the code grows a character after
    /// each full round of collisions rather than spinning forever.
    fn claim_handle(&self) -> String {
        let mut rng = rand::thread_rng();
        let mut code_len = self.config.code_len.max(1);
        let mut attempts = 0usize;

        loop {
            let code: String = (0..code_len)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            let handle = format!("{}{}", self.config.prefix, code);
            if self.active_handles.insert(handle.clone()) {
                return handle;
            }
            attempts += 1;
            if attempts % CODE_ALPHABET.len() == 0 {
                code_len += 1;
            }
        }
    }
}

impl Default for AnonymizerService {
    fn default() -> Self {
        Self::new(AnonymizerConfig::default())
    }
}
