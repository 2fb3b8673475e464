//! Error types for the simulation runner.
//!
//! Uses `thiserror` for typed errors raised while setting a run up:
//! configuration, scenario loading, prompt templates, response parsing.
//! Failures of individual LLM calls are reported as
//! [`BackendError`](cascade_core::BackendError) so the round runner can
//! decide whether to retry them.

/// Errors that can occur while preparing or driving a run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// The scenario file could not be read or describes no usable scenario.
    #[error("scenario error: {0}")]
    Scenario(String),

    /// Failed to load or render a prompt template.
    #[error("template render error: {0}")]
    Template(String),

    /// The LLM response could not be parsed as structured JSON.
    #[error("response parse error: {0}")]
    Parse(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
