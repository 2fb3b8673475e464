//! Per-simulation configuration.
//!
//! A [`SimulationConfig`] is fixed when a simulation starts and travels with
//! it (it is persisted alongside the rounds). Every field carries a serde
//! default so partial YAML or JSON documents deserialize cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A configuration value that cannot drive a simulation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigViolation {
    /// `max_rounds` must be at least 1.
    #[error("max_rounds must be at least 1")]
    MaxRounds,

    /// `concurrency_limit` must be at least 1.
    #[error("concurrency_limit must be at least 1")]
    ConcurrencyLimit,

    /// `per_call_timeout_ms` must be positive.
    #[error("per_call_timeout_ms must be greater than 0")]
    PerCallTimeout,

    /// The stabilization threshold must lie in `[0, 1]`.
    #[error("stabilization threshold {0} is outside [0, 1]")]
    Threshold(f64),

    /// At least one consecutive stable transition is required.
    #[error("stabilization consecutive_rounds must be at least 1")]
    ConsecutiveRounds,

    /// Similarity weights must be finite, non-negative, and not all zero.
    #[error("stabilization weights must be non-negative with a positive sum")]
    Weights,
}

/// When a round with failed entities may still be appended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoveragePolicy {
    /// Strictly more than half of the entities responded.
    #[default]
    Majority,
    /// Every entity responded.
    Unanimous,
    /// At least one entity responded.
    AnyResponse,
}

impl CoveragePolicy {
    /// Whether `responded` out of `total` entities satisfies the policy.
    pub const fn is_satisfied(self, responded: usize, total: usize) -> bool {
        match self {
            Self::Majority => responded.saturating_mul(2) > total,
            Self::Unanimous => responded == total && total > 0,
            Self::AnyResponse => responded > 0,
        }
    }
}

/// Configuration for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Upper bound on the number of rounds.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Convergence detection parameters.
    #[serde(default)]
    pub stabilization: StabilizationConfig,

    /// Maximum backend calls in flight within one round.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: u32,

    /// Timeout for a single backend call, in milliseconds.
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,

    /// Deadline for a whole round, in milliseconds. `0` derives it from the
    /// call timeout, retry policy, and concurrency limit.
    #[serde(default)]
    pub round_timeout_ms: u64,

    /// Retry behavior for transient backend failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Minimum response coverage for a round to be kept.
    #[serde(default)]
    pub coverage: CoveragePolicy,

    /// Bounds on the history handed to each entity.
    #[serde(default)]
    pub memory: MemoryPolicy,

    /// Fulcrum selection parameters.
    #[serde(default)]
    pub fulcrum: FulcrumPolicy,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            stabilization: StabilizationConfig::default(),
            concurrency_limit: default_concurrency_limit(),
            per_call_timeout_ms: default_per_call_timeout_ms(),
            round_timeout_ms: 0,
            retry: RetryPolicy::default(),
            coverage: CoveragePolicy::default(),
            memory: MemoryPolicy::default(),
            fulcrum: FulcrumPolicy::default(),
        }
    }
}

impl SimulationConfig {
    /// Check the values the round loop depends on.
    pub fn validate(&self) -> Result<(), ConfigViolation> {
        if self.max_rounds < 1 {
            return Err(ConfigViolation::MaxRounds);
        }
        if self.concurrency_limit < 1 {
            return Err(ConfigViolation::ConcurrencyLimit);
        }
        if self.per_call_timeout_ms == 0 {
            return Err(ConfigViolation::PerCallTimeout);
        }
        self.stabilization.validate()
    }

    /// Timeout applied to each individual backend call.
    pub const fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    /// Explicitly configured round deadline, if any.
    pub const fn explicit_round_timeout(&self) -> Option<Duration> {
        if self.round_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.round_timeout_ms))
        }
    }

    /// Round deadline for a round with `entity_count` participants.
    ///
    /// Uses `round_timeout_ms` when set. Otherwise every wave of
    /// `concurrency_limit` calls may spend its full retry budget:
    /// `(per_call_timeout * (max_retries + 1) + worst_case_backoff) * waves`.
    pub fn round_deadline(&self, entity_count: usize) -> Duration {
        if let Some(explicit) = self.explicit_round_timeout() {
            return explicit;
        }
        let limit = usize::try_from(self.concurrency_limit.max(1)).unwrap_or(usize::MAX);
        let waves = u32::try_from(entity_count.div_ceil(limit))
            .unwrap_or(u32::MAX)
            .max(1);
        let attempts = self.retry.max_retries.saturating_add(1);
        let per_wave = self
            .per_call_timeout()
            .saturating_mul(attempts)
            .saturating_add(self.retry.worst_case_backoff());
        per_wave.saturating_mul(waves)
    }
}

/// Convergence detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizationConfig {
    /// Minimum structural similarity for a transition to count as stable.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Consecutive stable transitions required before stopping.
    #[serde(default = "default_consecutive_rounds")]
    pub consecutive_rounds: u32,

    /// Component weights of the similarity metric.
    #[serde(default)]
    pub weights: SimilarityWeights,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            consecutive_rounds: default_consecutive_rounds(),
            weights: SimilarityWeights::default(),
        }
    }
}

impl StabilizationConfig {
    fn validate(&self) -> Result<(), ConfigViolation> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigViolation::Threshold(self.threshold));
        }
        if self.consecutive_rounds < 1 {
            return Err(ConfigViolation::ConsecutiveRounds);
        }
        if !self.weights.is_valid() {
            return Err(ConfigViolation::Weights);
        }
        Ok(())
    }
}

/// Weights of the four structural similarity components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    /// Weight of theme label overlap.
    #[serde(default = "default_theme_weight")]
    pub themes: f64,
    /// Weight of alignment/conflict edge overlap.
    #[serde(default = "default_coalition_weight")]
    pub coalitions: f64,
    /// Weight of gap overlap.
    #[serde(default = "default_gap_weight")]
    pub gaps: f64,
    /// Weight of per-entity stance agreement.
    #[serde(default = "default_stance_weight")]
    pub stances: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            themes: default_theme_weight(),
            coalitions: default_coalition_weight(),
            gaps: default_gap_weight(),
            stances: default_stance_weight(),
        }
    }
}

impl SimilarityWeights {
    /// Sum of all weights.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn total(&self) -> f64 {
        self.themes + self.coalitions + self.gaps + self.stances
    }

    fn is_valid(&self) -> bool {
        let parts = [self.themes, self.coalitions, self.gaps, self.stances];
        parts.iter().all(|w| w.is_finite() && *w >= 0.0) && self.total() > 0.0
    }
}

/// Retry behavior for transient backend failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff cap, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Randomize each backoff into `[delay / 2, delay]`.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32);
        let factor = 1_u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Longest total backoff one entity can spend. A `Retry-After` hint may
    /// stretch any wait up to `max_backoff_ms`, so every retry is budgeted
    /// at the cap.
    pub fn worst_case_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms).saturating_mul(self.max_retries)
    }
}

/// Bounds on the history handed to each entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    /// Maximum peer excerpts per entity per round.
    #[serde(default = "default_max_peer_responses")]
    pub max_peer_responses: usize,
    /// Maximum characters per peer excerpt.
    #[serde(default = "default_max_excerpt_chars")]
    pub max_excerpt_chars: usize,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            max_peer_responses: default_max_peer_responses(),
            max_excerpt_chars: default_max_excerpt_chars(),
        }
    }
}

/// Fulcrum selection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulcrumPolicy {
    /// Maximum number of fulcrums reported.
    #[serde(default = "default_max_fulcrums")]
    pub max_fulcrums: usize,
    /// Candidates must score strictly above this value.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for FulcrumPolicy {
    fn default() -> Self {
        Self {
            max_fulcrums: default_max_fulcrums(),
            min_score: default_min_score(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

const fn default_max_rounds() -> u32 {
    5
}

const fn default_concurrency_limit() -> u32 {
    4
}

const fn default_per_call_timeout_ms() -> u64 {
    60_000
}

const fn default_threshold() -> f64 {
    0.85
}

const fn default_consecutive_rounds() -> u32 {
    1
}

const fn default_theme_weight() -> f64 {
    0.35
}

const fn default_coalition_weight() -> f64 {
    0.35
}

const fn default_gap_weight() -> f64 {
    0.15
}

const fn default_stance_weight() -> f64 {
    0.15
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    8_000
}

const fn default_true() -> bool {
    true
}

const fn default_max_peer_responses() -> usize {
    5
}

const fn default_max_excerpt_chars() -> usize {
    600
}

const fn default_max_fulcrums() -> usize {
    3
}

const fn default_min_score() -> f64 {
    0.05
}
