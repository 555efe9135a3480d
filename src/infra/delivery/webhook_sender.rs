// Webhook-backed delivery sender.
//
// Implements the DeliverySender port by POSTing rendered content to the
// delivery endpoint, authenticated with the credential belonging to the
// chosen connection. One request per dispatch; retries are the dispatcher's
// (non-)policy, not ours.

use crate::core::dispatch::{ChannelConnection, DeliveryError, DeliverySender};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Serialize)]
struct DeliveryPayload<'a> {
    connection_id: u64,
    text: &'a str,
}

pub struct WebhookDeliverySender {
    client: Client,
    url: String,
    /// Bearer credential per connection id, taken from the connection pool
    /// itself so the two can never drift apart.
    credentials: HashMap<u64, String>,
}

impl WebhookDeliverySender {
    pub fn new(url: impl Into<String>, connections: &[ChannelConnection]) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            credentials: connections
                .iter()
                .map(|conn| (conn.connection_id, conn.credentials_ref.clone()))
                .collect(),
        }
    }

    fn credential_for(&self, connection_id: u64) -> Option<&str> {
        self.credentials.get(&connection_id).map(String::as_str)
    }
}

#[async_trait]
impl DeliverySender for WebhookDeliverySender {
    async fn send(&self, connection_id: u64, rendered: &str) -> Result<(), DeliveryError> {
        let credential = self
            .credential_for(connection_id)
            .ok_or_else(|| DeliveryError(format!("unknown connection {}", connection_id)))?;

        self.client
            .post(&self.url)
            .bearer_auth(credential)
            .json(&DeliveryPayload {
                connection_id,
                text: rendered,
            })
            .send()
            .await
            .map_err(|e| DeliveryError(e.to_string()))?
            .error_for_status()
            .map_err(|e| DeliveryError(e.to_string()))?;

        Ok(())
    }
}
