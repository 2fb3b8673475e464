//! The reasoning backend handed to the orchestrator.
//!
//! For each entity and round the pipeline is:
//! 1. Render the prompt from templates
//! 2. Call the LLM backend
//! 3. Parse the structured response
//!
//! Retries, timeouts, and concurrency limits are the round runner's job;
//! this module only classifies what went wrong so it can decide.

use std::time::Instant;

use cascade_core::backend::StubReasoningBackend;
use cascade_core::{BackendError, GeneratedResponse, GenerationRequest, ReasoningBackend};
use tracing::debug;

use crate::config::LlmBackendConfig;
use crate::error::RunnerError;
use crate::llm::{LlmBackend, create_backend};
use crate::parse::parse_llm_response;
use crate::prompt::PromptEngine;

/// An HTTP LLM backend paired with the templates its prompts come from.
#[derive(Debug)]
pub struct LlmReasoner {
    backend: LlmBackend,
    prompts: PromptEngine,
}

/// Produces entity responses from an LLM, or offline from the stub.
#[derive(Debug)]
pub enum Reasoner {
    /// Prompts rendered from templates and sent to an HTTP LLM backend.
    Llm(Box<LlmReasoner>),
    /// Deterministic responses without network access.
    Stub(StubReasoningBackend),
}

impl Reasoner {
    /// Build the reasoner for a backend configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Template`] if an LLM backend is configured and
    /// the prompt templates cannot be loaded.
    pub fn from_config(
        config: &LlmBackendConfig,
        templates_dir: &str,
    ) -> Result<Self, RunnerError> {
        match create_backend(config) {
            Some(backend) => Ok(Self::Llm(Box::new(LlmReasoner {
                backend,
                prompts: PromptEngine::new(templates_dir)?,
            }))),
            None => Ok(Self::Stub(StubReasoningBackend::new())),
        }
    }

    /// Human-readable name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Llm(llm) => llm.backend.name(),
            Self::Stub(_) => "stub",
        }
    }
}

impl ReasoningBackend for Reasoner {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedResponse, BackendError> {
        let LlmReasoner { backend, prompts } = match self {
            Self::Llm(llm) => llm.as_ref(),
            Self::Stub(stub) => return stub.generate(request).await,
        };

        let prompt = prompts
            .render(request)
            .map_err(|e| BackendError::Invalid(e.to_string()))?;

        let start = Instant::now();
        let raw = backend.complete(&prompt).await?;
        debug!(
            entity = %request.entity.name,
            round = request.round_number,
            backend = backend.name(),
            latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            response_chars = raw.chars().count(),
            "LLM call completed"
        );

        parse_llm_response(&raw)
    }
}
