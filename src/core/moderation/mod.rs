// Core moderation module - the approval queue and consensus engine.

pub mod consensus_service;
pub mod moderation_models;

pub use consensus_service::*;
pub use moderation_models::*;
