pub mod pipeline;
pub mod plan;
pub mod rephrase;
pub mod respond;
pub mod types;
pub mod validate_fix;

use crate::llm::json::ModelOutputParseError;
use crate::llm::LlmError;
use thiserror::Error;

pub use pipeline::{Pipeline, PipelineInput, PipelineOutput, PipelineSettings};
pub use types::ConversationTurn;

/// Sampling temperature for rephrasing, planning and repair.
pub const PLANNING_TEMPERATURE: f32 = 0.1;
/// Sampling temperature for the final narration.
pub const NARRATION_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    ModelOutput(#[from] ModelOutputParseError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("prompt rendering failed: {0}")]
    Prompt(#[from] minijinja::Error),
    #[error("failed to serialize prompt context: {0}")]
    Serialization(#[from] serde_json::Error),
}
