// Relay layer - the transport-facing adapters.

#[path = "pipeline.rs"]
pub mod pipeline;

#[path = "prompts.rs"]
pub mod prompts;

pub use pipeline::{
    InboundOutcome, MembershipStatus, PipelineConfig, PipelineError, RelayPipeline,
};
