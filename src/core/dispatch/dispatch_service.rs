// Channel dispatcher - load-balanced outbound delivery.
//
// Outbound content goes out over a pool of interchangeable connections,
// selected round robin. The selection is deliberately independent of the
// connection the content arrived on: inbound and outbound channels must stay
// decorrelated or the pseudonymization is pointless.
//
// Delivery is fire-and-forget: a failed send is logged and the connection
// marked unhealthy, but the content is NOT retried on an alternate
// connection.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Delivery failure on one connection. Logged and swallowed per recipient,
/// never retried.
#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Trait for the downstream delivery layer.
#[async_trait]
pub trait DeliverySender: Send + Sync {
    /// Send `rendered` over the connection identified by `connection_id`.
    async fn send(&self, connection_id: u64, rendered: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The only fatal pipeline condition: nothing to deliver over.
    #[error("no outbound connections configured")]
    NoConnections,
}

/// One outbound delivery connection.
#[derive(Debug)]
pub struct ChannelConnection {
    pub connection_id: u64,
    pub credentials_ref: String,
    healthy: AtomicBool,
}

impl ChannelConnection {
    pub fn new(connection_id: u64, credentials_ref: impl Into<String>) -> Self {
        Self {
            connection_id,
            credentials_ref: credentials_ref.into(),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

/// What happened to one dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub connection_id: u64,
    pub delivered: bool,
}

/// Round-robin dispatcher over the connection pool.
pub struct DispatcherService {
    connections: Vec<ChannelConnection>,
    cursor: AtomicUsize,
    sender: Arc<dyn DeliverySender>,
}

impl DispatcherService {
    pub fn new(connections: Vec<ChannelConnection>, sender: Arc<dyn DeliverySender>) -> Self {
        Self {
            connections,
            cursor: AtomicUsize::new(0),
            sender,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Render `handle: text` and deliver it over the next connection in
    /// rotation.
    ///
    /// The cursor advances exactly once per call that selects a connection,
    /// so N sequential calls over M connections select 0, 1, ..., M-1, 0,
    /// regardless of delivery outcome.
    pub async fn dispatch(&self, handle: &str, text: &str) -> Result<DispatchReport, DispatchError> {
        if self.connections.is_empty() {
            return Err(DispatchError::NoConnections);
        }

        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let connection = &self.connections[slot];
        let rendered = format!("{}: {}", handle, text);

        match self.sender.send(connection.connection_id, &rendered).await {
            Ok(()) => {
                connection.healthy.store(true, Ordering::Relaxed);
                tracing::debug!(
                    connection_id = connection.connection_id,
                    handle = %handle,
                    "dispatched content"
                );
                Ok(DispatchReport {
                    connection_id: connection.connection_id,
                    delivered: true,
                })
            }
            Err(err) => {
                connection.healthy.store(false, Ordering::Relaxed);
                tracing::warn!(
                    connection_id = connection.connection_id,
                    error = %err,
                    "outbound delivery failed; not retrying"
                );
                Ok(DispatchReport {
                    connection_id: connection.connection_id,
                    delivered: false,
                })
            }
        }
    }
}
