// The core module contains all business logic.
// Each pipeline component gets its own submodule.

#[path = "content.rs"]
pub mod content;

#[path = "anonymizer/anonymizer_service.rs"]
pub mod anonymizer;

#[path = "classifier/classifier_service.rs"]
pub mod classifier;

#[path = "registry/registry_service.rs"]
pub mod registry;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "dispatch/dispatch_service.rs"]
pub mod dispatch;
