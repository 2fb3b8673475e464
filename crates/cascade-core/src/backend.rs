//! Reasoning backend trait and stub implementation.
//!
//! Each round, the round runner asks the [`ReasoningBackend`] for one
//! response per entity. The trait abstracts how a response is produced:
//! an LLM service, a scripted fake in tests, or the deterministic
//! [`StubReasoningBackend`] for dry runs.
//!
//! Backends classify their failures. [`BackendError::Timeout`],
//! [`BackendError::RateLimited`], and [`BackendError::Unavailable`] are
//! transient and retried by the round runner; [`BackendError::Invalid`]
//! is permanent and recorded immediately.

use std::future::Future;

use cascade_types::{
    CrossEntityAnalysis, EntityRoundMemory, ResponseSignals, Scenario, SimulationEntity,
};

/// Errors a reasoning backend can report for a single call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The call did not complete within its timeout.
    #[error("backend call timed out after {elapsed_ms}ms")]
    Timeout {
        /// How long the call ran before being abandoned.
        elapsed_ms: u64,
    },

    /// The backend asked the caller to slow down.
    #[error("backend rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited {
        /// Suggested wait before retrying, when the backend supplied one.
        retry_after_ms: Option<u64>,
    },

    /// The backend could not be reached or failed internally.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The request or the backend's answer is unusable. Never retried.
    #[error("invalid backend response: {0}")]
    Invalid(String),
}

impl BackendError {
    /// Whether retrying the same call may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }
}

/// Everything a backend needs to produce one entity's response for one round.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// The round being played.
    pub round_number: u32,
    /// The scenario under simulation.
    pub scenario: &'a Scenario,
    /// The entity being asked to respond.
    pub entity: &'a SimulationEntity,
    /// The entity's bounded view of the history.
    pub memory: &'a EntityRoundMemory,
    /// The previous round's analysis; `None` in round 1.
    pub prior_analysis: Option<&'a CrossEntityAnalysis>,
}

/// A backend's answer for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedResponse {
    /// Free-form reasoning text.
    pub content: String,
    /// Structured signals extracted from the text.
    pub signals: ResponseSignals,
}

/// A source of entity responses.
///
/// Implementations must be shareable across the concurrent calls of a
/// round, so `generate` takes `&self`.
pub trait ReasoningBackend: Send + Sync {
    /// Produce one entity's response for one round.
    fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> impl Future<Output = Result<GeneratedResponse, BackendError>> + Send;
}

/// A deterministic backend for dry runs.
///
/// Every entity holds its profile stance, voices its priorities plus the
/// default concerns of its role, and from round 2 on picks up the most
/// widely raised theme of the previous round. Runs therefore converge
/// after a couple of rounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubReasoningBackend;

impl StubReasoningBackend {
    /// Create a new stub backend.
    pub const fn new() -> Self {
        Self
    }

    fn respond(request: &GenerationRequest<'_>) -> GeneratedResponse {
        let entity = request.entity;
        let mut themes: Vec<String> = entity.profile.priorities.iter().take(3).cloned().collect();
        let top = request
            .prior_analysis
            .and_then(|analysis| analysis.themes.first())
            .map(|theme| theme.label.clone());
        if let Some(label) = top.filter(|label| !themes.contains(label)) {
            themes.push(label);
        }
        let concerns: Vec<String> = entity
            .role
            .default_concerns()
            .iter()
            .map(|c| (*c).to_owned())
            .collect();

        let content = format!(
            "{} keeps a {:?} position on \"{}\" in round {}, focusing on {}.",
            entity.name,
            entity.profile.stance,
            request.scenario.title,
            request.round_number,
            if themes.is_empty() {
                String::from("its core interests")
            } else {
                themes.join(", ")
            }
        );

        GeneratedResponse {
            content,
            signals: ResponseSignals {
                stance: Some(entity.profile.stance),
                stance_shift: None,
                concerns,
                proposed_actions: Vec::new(),
                themes,
            },
        }
    }
}

impl ReasoningBackend for StubReasoningBackend {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedResponse, BackendError> {
        Ok(Self::respond(request))
    }
}
