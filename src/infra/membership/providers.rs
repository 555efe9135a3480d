// Membership provider implementations.
//
// The registry core only knows the MembershipProvider trait; these supply
// the moderator set either from an HTTP endpoint or from static
// configuration.

use crate::core::registry::{MembershipProvider, RegistryError};
use async_trait::async_trait;
use reqwest::Client;

/// Fetches the moderator set from an HTTP endpoint returning a JSON array,
/// either of bare numeric ids (`[1001, 1002]`) or of member objects with an
/// `id` field (`[{"id": 1001}, ...]`).
pub struct HttpMembershipProvider {
    client: Client,
    url: String,
}

impl HttpMembershipProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

/// Extract moderator ids from either payload shape.
fn parse_moderator_ids(payload: &serde_json::Value) -> Result<Vec<u64>, RegistryError> {
    let entries = payload
        .as_array()
        .ok_or_else(|| RegistryError::Provider("expected a JSON array of members".to_string()))?;

    entries
        .iter()
        .map(|entry| {
            entry
                .as_u64()
                .or_else(|| entry.get("id").and_then(|id| id.as_u64()))
                .ok_or_else(|| {
                    RegistryError::Provider(format!("unrecognized member entry: {}", entry))
                })
        })
        .collect()
}

#[async_trait]
impl MembershipProvider for HttpMembershipProvider {
    async fn fetch_moderators(&self) -> Result<Vec<u64>, RegistryError> {
        let payload: serde_json::Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RegistryError::Provider(e.to_string()))?
            .error_for_status()
            .map_err(|e| RegistryError::Provider(e.to_string()))?
            .json()
            .await
            .map_err(|e| RegistryError::Provider(e.to_string()))?;

        parse_moderator_ids(&payload)
    }
}

/// A fixed moderator set, for deployments configured by hand and for tests.
pub struct StaticMembershipProvider {
    moderators: Vec<u64>,
}

impl StaticMembershipProvider {
    pub fn new(moderators: Vec<u64>) -> Self {
        Self { moderators }
    }
}

#[async_trait]
impl MembershipProvider for StaticMembershipProvider {
    async fn fetch_moderators(&self) -> Result<Vec<u64>, RegistryError> {
        Ok(self.moderators.clone())
    }
}
