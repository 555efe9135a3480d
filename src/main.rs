// This is the entry point of the anonymous relay.
//
// **Architecture Overview:**
// - `core/` = Business logic (transport-agnostic)
// - `infra/` = Implementations of core ports (HTTP, files)
// - `relay/` = The pipeline entry points the transport layer calls into
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Spawn the background loops (registry refresh, block-list reload,
//    expiry sweep)
//
// The transport itself (webhook/long-poll ingestion) is wired up outside
// this crate; it receives the Arc<RelayPipeline> built here.

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "relay/relay_layer.rs"]
mod relay;

use crate::core::anonymizer::{AnonymizerConfig, AnonymizerService};
use crate::core::classifier::ClassifierService;
use crate::core::dispatch::{ChannelConnection, DispatcherService};
use crate::core::moderation::{ConsensusConfig, ConsensusService, RejectPolicy};
use crate::core::registry::{MembershipProvider, RegistryService};
use crate::infra::blocklist::FileBlockTermSource;
use crate::infra::delivery::WebhookDeliverySender;
use crate::infra::membership::{HttpMembershipProvider, StaticMembershipProvider};
use crate::infra::notify::WebhookPromptNotifier;
use crate::relay::{PipelineConfig, RelayPipeline};
use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    // One outbound credential per connection, comma separated.
    let connection_tokens: Vec<String> = std::env::var("RELAY_CONNECTION_TOKENS")
        .context("RELAY_CONNECTION_TOKENS is required (comma-separated credentials)")?
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if connection_tokens.is_empty() {
        bail!("RELAY_CONNECTION_TOKENS must name at least one outbound connection");
    }

    let delivery_url =
        std::env::var("DELIVERY_URL").context("DELIVERY_URL is required (outbound delivery endpoint)")?;
    let prompt_url_template = std::env::var("PROMPT_URL_TEMPLATE").context(
        "PROMPT_URL_TEMPLATE is required (per-moderator prompt endpoint with a \
         {moderator_id} placeholder)",
    )?;

    let anon_prefix = std::env::var("ANON_PREFIX").unwrap_or_else(|_| "User".to_string());
    let anon_code_len = env_or("ANON_CODE_LEN", 6usize);
    let blocklist_path =
        std::env::var("BLOCKLIST_PATH").unwrap_or_else(|_| "blocked.txt".to_string());
    let blocklist_reload_secs = env_or("BLOCKLIST_RELOAD_SECS", 300u64);
    let registry_refresh_secs = env_or("REGISTRY_REFRESH_SECS", 300u64);
    let expiry_sweep_secs = env_or("EXPIRY_SWEEP_SECS", 60u64);
    let pending_ttl_secs = env_or("PENDING_TTL_SECS", 900u64);

    let reject_policy = match std::env::var("REJECT_POLICY").as_deref() {
        Ok("wait-all") => RejectPolicy::WaitForAllModerators,
        Ok("close") | Err(_) => RejectPolicy::CloseImmediately,
        Ok(other) => bail!("unknown REJECT_POLICY {:?} (expected \"close\" or \"wait-all\")", other),
    };
    let exempt_moderators = env_or("EXEMPT_MODERATORS", true);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let anonymizer = Arc::new(AnonymizerService::new(AnonymizerConfig {
        prefix: anon_prefix,
        code_len: anon_code_len,
    }));

    // Classifier starts without a snapshot (pattern-only) until the first
    // block-list load publishes one.
    let classifier = Arc::new(ClassifierService::new());
    let block_source = Arc::new(FileBlockTermSource::new(&blocklist_path));
    classifier.publish(block_source.load_or_empty());

    // Moderator set: an HTTP membership endpoint when configured, otherwise
    // a static id list.
    let provider: Arc<dyn MembershipProvider> = match std::env::var("MEMBERSHIP_URL") {
        Ok(url) => Arc::new(HttpMembershipProvider::new(url)),
        Err(_) => {
            let ids: Vec<u64> = std::env::var("MODERATOR_IDS")
                .context("set MEMBERSHIP_URL or MODERATOR_IDS (comma-separated ids)")?
                .split(',')
                .filter_map(|id| id.trim().parse().ok())
                .collect();
            Arc::new(StaticMembershipProvider::new(ids))
        }
    };
    let registry = Arc::new(RegistryService::new(provider));
    if let Err(err) = registry.refresh().await {
        tracing::warn!(error = %err, "initial moderator refresh failed; starting with an empty set");
    }

    let connections: Vec<ChannelConnection> = connection_tokens
        .iter()
        .enumerate()
        .map(|(idx, token)| ChannelConnection::new(idx as u64, token.clone()))
        .collect();
    let sender = Arc::new(WebhookDeliverySender::new(delivery_url, &connections));
    let dispatcher = Arc::new(DispatcherService::new(connections, sender));

    let notifier = Arc::new(WebhookPromptNotifier::new(prompt_url_template));
    let consensus = Arc::new(ConsensusService::new(
        ConsensusConfig {
            pending_ttl: Duration::from_secs(pending_ttl_secs),
            reject_policy,
        },
        Arc::clone(&registry),
        notifier,
        Arc::clone(&dispatcher),
    ));

    let connection_count = dispatcher.connection_count();
    let pipeline = Arc::new(RelayPipeline::new(
        PipelineConfig { exempt_moderators },
        anonymizer,
        Arc::clone(&classifier),
        Arc::clone(&registry),
        Arc::clone(&consensus),
        dispatcher,
    ));

    tracing::info!(
        connections = connection_count,
        moderators = registry.snapshot().len(),
        "anonymous relay pipeline ready"
    );

    // ========================================================================
    // BACKGROUND LOOPS
    // ========================================================================

    // Periodic moderator refresh. decide()/submit() only ever read the
    // cached snapshot, so this loop is the sole place membership I/O runs.
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(registry_refresh_secs)).await;
                match registry.refresh().await {
                    Ok(count) => tracing::debug!(moderators = count, "moderator refresh complete"),
                    Err(err) => tracing::warn!(error = %err, "moderator refresh failed"),
                }
            }
        });
    }

    // Periodic block-list reload -> snapshot publish.
    {
        let classifier = Arc::clone(&classifier);
        let block_source = Arc::clone(&block_source);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(blocklist_reload_secs)).await;
                classifier.publish(block_source.load_or_empty());
            }
        });
    }

    // Expiry sweep for submissions nobody reviewed in time.
    {
        let consensus = Arc::clone(&consensus);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(expiry_sweep_secs)).await;
                let expired = consensus.expire_overdue().await;
                if expired > 0 {
                    tracing::info!(expired, "expired unreviewed submissions");
                }
            }
        });
    }

    // The transport layer (out of scope here) drives `pipeline` from its
    // inbound hooks. Keep it alive until shutdown.
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    drop(pipeline);
    Ok(())
}
