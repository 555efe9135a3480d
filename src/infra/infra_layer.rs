// The infra layer - implementations of the ports defined in core.

#[path = "blocklist/file_source.rs"]
pub mod blocklist;

#[path = "membership/providers.rs"]
pub mod membership;

#[path = "delivery/webhook_sender.rs"]
pub mod delivery;

#[path = "notify/webhook_notifier.rs"]
pub mod notify;
