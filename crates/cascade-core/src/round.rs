//! Execution of a single simulation round.
//!
//! The [`RoundRunner`] builds every entity's memory from the completed
//! history, calls the reasoning backend for all entities concurrently (at
//! most `concurrency_limit` in flight), and analyzes whatever came back.
//!
//! Each call has its own timeout. Transient backend failures are retried
//! with exponential backoff up to `max_retries`; permanent failures are
//! recorded at once. A round-level deadline bounds the whole collection:
//! entities still outstanding when it passes are recorded as failures.
//! An abort request drops every in-flight call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use cascade_types::{
    EntityFailure, EntityId, EntityResponse, EntityRoundMemory, RetryPolicy, RoundContext,
    Scenario, SimulationConfig, SimulationEntity, SimulationRound,
};
use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::analysis;
use crate::backend::{BackendError, GenerationRequest, ReasoningBackend};
use crate::control::SimulationControl;
use crate::error::{PartialRoundFailure, SimulationError};
use crate::memory;

/// The outcome of one round.
#[derive(Debug, Clone)]
pub struct RoundReport {
    /// The completed round, ready to append.
    pub round: SimulationRound,
    /// Set when at least one entity produced no response.
    pub partial: Option<PartialRoundFailure>,
}

impl RoundReport {
    /// Number of entities that responded.
    pub fn responded(&self) -> usize {
        self.round.responses.len()
    }
}

/// Runs rounds against a reasoning backend under one configuration.
#[derive(Debug)]
pub struct RoundRunner<'a, B> {
    backend: &'a B,
    config: &'a SimulationConfig,
}

impl<'a, B: ReasoningBackend> RoundRunner<'a, B> {
    /// Create a runner borrowing the backend and configuration.
    pub const fn new(backend: &'a B, config: &'a SimulationConfig) -> Self {
        Self { backend, config }
    }

    /// Run one round.
    ///
    /// `context` must carry the round number and prior analysis; the runner
    /// fills in the per-entity memories from `history`.
    ///
    /// # Errors
    ///
    /// - [`SimulationError::Cancelled`] if `control` is aborted mid-round.
    /// - [`SimulationError::Analysis`] if no entity responded.
    pub async fn run(
        &self,
        scenario: &Scenario,
        mut context: RoundContext,
        history: &[SimulationRound],
        control: &SimulationControl,
    ) -> Result<RoundReport, SimulationError> {
        let round_number = context.round_number;
        let started_at = Utc::now();

        for entity in &scenario.entities {
            let memory = memory::build(entity.id, round_number, history, &self.config.memory);
            context.memories.insert(entity.id, memory);
        }

        let deadline = self.config.round_deadline(scenario.entities.len());
        info!(
            round = round_number,
            entities = scenario.entities.len(),
            concurrency = self.config.concurrency_limit,
            deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            "Round starting"
        );

        let attempts: BTreeMap<EntityId, AtomicU32> = scenario
            .entities
            .iter()
            .map(|e| (e.id, AtomicU32::new(0)))
            .collect();
        let mut outcomes = self
            .collect(scenario, &context, &attempts, deadline, control)
            .await?;

        let mut responses = Vec::new();
        let mut failures = Vec::new();
        for entity in &scenario.entities {
            match outcomes.remove(&entity.id) {
                Some(Ok(response)) => responses.push(response),
                Some(Err(failure)) => failures.push(failure),
                None => {
                    let made = attempts
                        .get(&entity.id)
                        .map_or(0, |count| count.load(Ordering::Relaxed));
                    debug!(
                        round = round_number,
                        entity_id = %entity.id,
                        "Entity still pending at round deadline"
                    );
                    failures.push(EntityFailure {
                        entity_id: entity.id,
                        attempts: made,
                        reason: String::from("round deadline exceeded"),
                    });
                }
            }
        }

        let analysis =
            analysis::analyze(round_number, &responses, &scenario.concern_categories())?;

        let partial = if failures.is_empty() {
            None
        } else {
            warn!(
                round = round_number,
                responded = responses.len(),
                failed = failures.len(),
                "Some entities did not respond"
            );
            Some(PartialRoundFailure {
                round_number,
                failed: failures.clone(),
                responded: responses.len(),
            })
        };

        info!(
            round = round_number,
            responded = responses.len(),
            themes = analysis.themes.len(),
            gaps = analysis.gaps.len(),
            "Round complete"
        );

        Ok(RoundReport {
            round: SimulationRound {
                round_number,
                context,
                responses,
                failures,
                analysis,
                started_at,
                completed_at: Utc::now(),
            },
            partial,
        })
    }

    /// Drive all entity calls until they finish, the deadline passes, or
    /// the simulation is aborted.
    async fn collect(
        &self,
        scenario: &Scenario,
        context: &RoundContext,
        attempts: &BTreeMap<EntityId, AtomicU32>,
        round_deadline: Duration,
        control: &SimulationControl,
    ) -> Result<BTreeMap<EntityId, Result<EntityResponse, EntityFailure>>, SimulationError> {
        let round_number = context.round_number;
        let limit = usize::try_from(self.config.concurrency_limit.max(1)).unwrap_or(1);
        let pending: Vec<_> = scenario
            .entities
            .iter()
            .map(|entity| self.call_entity(scenario, entity, context, attempts.get(&entity.id)))
            .collect();
        let mut calls = futures::stream::iter(pending).buffer_unordered(limit);

        let mut outcomes = BTreeMap::new();
        let deadline = tokio::time::Instant::now()
            .checked_add(round_deadline)
            .unwrap_or_else(tokio::time::Instant::now);

        while outcomes.len() < scenario.entities.len() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(round = round_number, "Round deadline reached");
                break;
            }

            tokio::select! {
                () = control.cancelled() => {
                    info!(round = round_number, "Abort requested, dropping in-flight calls");
                    return Err(SimulationError::Cancelled { round_number });
                }
                next = tokio::time::timeout(remaining, calls.next()) => match next {
                    Ok(Some((entity_id, outcome))) => {
                        outcomes.insert(entity_id, outcome);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(round = round_number, "Round deadline reached");
                        break;
                    }
                },
            }
        }

        Ok(outcomes)
    }

    /// Call the backend for one entity, retrying transient failures.
    async fn call_entity(
        &self,
        scenario: &Scenario,
        entity: &SimulationEntity,
        context: &RoundContext,
        counter: Option<&AtomicU32>,
    ) -> (EntityId, Result<EntityResponse, EntityFailure>) {
        let round_number = context.round_number;
        let fallback = EntityRoundMemory::empty(entity.id, round_number);
        let request = GenerationRequest {
            round_number,
            scenario,
            entity,
            memory: context.memories.get(&entity.id).unwrap_or(&fallback),
            prior_analysis: context.prior_analysis.as_ref(),
        };
        let per_call = self.config.per_call_timeout();
        let retry = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            if let Some(counter) = counter {
                counter.store(attempt, Ordering::Relaxed);
            }
            debug!(round = round_number, entity_id = %entity.id, attempt, "Calling backend");

            let result = match tokio::time::timeout(per_call, self.backend.generate(&request)).await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout {
                    elapsed_ms: self.config.per_call_timeout_ms,
                }),
            };

            match result {
                Ok(generated) => {
                    let response = EntityResponse {
                        entity_id: entity.id,
                        round_number,
                        content: generated.content,
                        signals: generated.signals,
                        responded_at: Utc::now(),
                    };
                    return (entity.id, Ok(response));
                }
                Err(err) if err.is_transient() && attempt <= retry.max_retries => {
                    let delay = backoff_delay(retry, attempt, &err);
                    warn!(
                        round = round_number,
                        entity_id = %entity.id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transient backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(
                        round = round_number,
                        entity_id = %entity.id,
                        attempts = attempt,
                        error = %err,
                        "Entity failed to respond"
                    );
                    let failure = EntityFailure {
                        entity_id: entity.id,
                        attempts: attempt,
                        reason: err.to_string(),
                    };
                    return (entity.id, Err(failure));
                }
            }
        }
    }
}

/// Delay before retry number `retry`: exponential, capped, optionally
/// jittered into `[delay / 2, delay]`, and never shorter than a
/// backend-supplied `retry_after` (still capped).
fn backoff_delay(policy: &RetryPolicy, retry: u32, err: &BackendError) -> Duration {
    let base = policy.backoff_for(retry);
    let cap = Duration::from_millis(policy.max_backoff_ms);
    let delay = if policy.jitter && !base.is_zero() {
        let millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let low = millis.div_ceil(2);
        Duration::from_millis(rand::rng().random_range(low..=millis))
    } else {
        base
    };
    match err {
        BackendError::RateLimited {
            retry_after_ms: Some(after),
        } => delay.max(Duration::from_millis(*after)).min(cap),
        _ => delay,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn backoff_without_jitter_is_exact() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            jitter: false,
        };
        let err = BackendError::Unavailable(String::from("503"));
        assert_eq!(backoff_delay(&policy, 1, &err), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 3, &err), Duration::from_millis(400));
    }

    #[test]
    fn jittered_backoff_stays_in_range() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            jitter: true,
        };
        let err = BackendError::Timeout { elapsed_ms: 1 };
        for _ in 0..50 {
            let delay = backoff_delay(&policy, 2, &err);
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn retry_after_is_honored_up_to_cap() {
        let policy = RetryPolicy {
            max_retries: 1,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
            jitter: false,
        };
        let err = BackendError::RateLimited {
            retry_after_ms: Some(300),
        };
        assert_eq!(backoff_delay(&policy, 1, &err), Duration::from_millis(300));
        let err = BackendError::RateLimited {
            retry_after_ms: Some(9_000),
        };
        assert_eq!(backoff_delay(&policy, 1, &err), Duration::from_millis(500));
    }
}
