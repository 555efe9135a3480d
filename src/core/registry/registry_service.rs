// Moderator registry - the authorized-reviewer set.
//
// The set lives with an external membership provider; we only ever hold an
// immutable snapshot of it. refresh() is the single place that performs
// external I/O - the consensus hot path (contains/snapshot) always reads the
// cached snapshot and never suspends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("membership provider error: {0}")]
    Provider(String),
}

/// Trait for the external membership provider.
///
/// Same port pattern as the delivery sender: core defines the contract,
/// infra supplies HTTP/static implementations.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// Fetch the current moderator ids from the source of truth.
    async fn fetch_moderators(&self) -> Result<Vec<u64>, RegistryError>;
}

/// An authorized moderator as of some snapshot.
#[derive(Debug, Clone)]
pub struct Moderator {
    pub moderator_id: u64,
    pub last_seen_in_snapshot: DateTime<Utc>,
}

/// Immutable point-in-time copy of the moderator set.
///
/// Wholesale-replaced on every successful refresh, never patched in place,
/// so readers can never observe a half-applied membership change.
#[derive(Debug, Clone, Default)]
pub struct ModeratorSnapshot {
    moderators: HashMap<u64, Moderator>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl ModeratorSnapshot {
    pub fn contains(&self, moderator_id: u64) -> bool {
        self.moderators.contains_key(&moderator_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.moderators.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.moderators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moderators.is_empty()
    }
}

/// Caches the moderator set and refreshes it on demand.
pub struct RegistryService {
    provider: Arc<dyn MembershipProvider>,
    snapshot: RwLock<Arc<ModeratorSnapshot>>,
}

impl RegistryService {
    pub fn new(provider: Arc<dyn MembershipProvider>) -> Self {
        Self {
            provider,
            snapshot: RwLock::new(Arc::new(ModeratorSnapshot::default())),
        }
    }

    /// Query the membership provider and publish a fresh snapshot.
    ///
    /// On provider failure the previous snapshot stays in place, so a flaky
    /// membership source degrades to slightly stale data instead of an empty
    /// moderator set.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        let ids = self.provider.fetch_moderators().await?;
        let now = Utc::now();

        let moderators: HashMap<u64, Moderator> = ids
            .into_iter()
            .map(|moderator_id| {
                (
                    moderator_id,
                    Moderator {
                        moderator_id,
                        last_seen_in_snapshot: now,
                    },
                )
            })
            .collect();
        let count = moderators.len();

        *self.snapshot.write().expect("moderator snapshot lock poisoned") =
            Arc::new(ModeratorSnapshot {
                moderators,
                refreshed_at: Some(now),
            });

        tracing::debug!(moderators = count, "refreshed moderator snapshot");
        Ok(count)
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<ModeratorSnapshot> {
        self.snapshot
            .read()
            .expect("moderator snapshot lock poisoned")
            .clone()
    }

    /// Whether `moderator_id` is in the current snapshot. Never blocks on
    /// the provider.
    pub fn contains(&self, moderator_id: u64) -> bool {
        self.snapshot().contains(moderator_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<Vec<Result<Vec<u64>, RegistryError>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<Vec<u64>, RegistryError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl MembershipProvider for ScriptedProvider {
        async fn fetch_moderators(&self) -> Result<Vec<u64>, RegistryError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    #[tokio::test]
    async fn refresh_replaces_the_snapshot_wholesale() {
        // Responses pop from the back: first refresh sees [1, 2], second [3].
        let provider = ScriptedProvider::new(vec![Ok(vec![3]), Ok(vec![1, 2])]);
        let registry = RegistryService::new(Arc::new(provider));

        assert!(registry.snapshot().is_empty());

        registry.refresh().await.unwrap();
        assert!(registry.contains(1));
        assert!(registry.contains(2));
        assert!(!registry.contains(3));

        registry.refresh().await.unwrap();
        assert!(!registry.contains(1));
        assert!(registry.contains(3));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_previous_snapshot() {
        let provider = ScriptedProvider::new(vec![
            Err(RegistryError::Provider("timeout".to_string())),
            Ok(vec![7]),
        ]);
        let registry = RegistryService::new(Arc::new(provider));

        registry.refresh().await.unwrap();
        assert!(registry.contains(7));

        assert!(registry.refresh().await.is_err());
        assert!(registry.contains(7), "stale snapshot must survive a failure");
    }
}
