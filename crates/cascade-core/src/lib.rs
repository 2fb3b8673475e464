//! Round loop, cross-entity analysis, and stabilization for the Cascade
//! stakeholder simulation.
//!
//! A simulation runs a scenario's entities through repeated rounds. In each
//! round every entity reasons about the scenario given a memory of earlier
//! rounds; the round's responses are then analyzed together. The loop stops
//! when consecutive analyses stop changing or the round limit is reached,
//! and the history is searched for the fulcrums that moved it most.
//!
//! # Modules
//!
//! - [`analysis`] -- Theme, coalition, influence, and gap extraction.
//! - [`backend`] -- [`ReasoningBackend`] trait and [`StubReasoningBackend`].
//! - [`config`] -- Configuration loading from `cascade-config.yaml`.
//! - [`control`] -- Abort signalling for running simulations.
//! - [`error`] -- Simulation lifecycle errors.
//! - [`fulcrum`] -- Ranking of the most consequential entities and rounds.
//! - [`memory`] -- Per-entity memory assembly from the round history.
//! - [`orchestrator`] -- [`SimulationOrchestrator`], the lifecycle controller.
//! - [`round`] -- [`RoundRunner`], bounded-concurrency round execution.
//! - [`stabilization`] -- Round-over-round similarity and the stop rule.
//! - [`store`] -- [`SimulationStore`] trait and an in-memory store.
//!
//! [`ReasoningBackend`]: backend::ReasoningBackend
//! [`StubReasoningBackend`]: backend::StubReasoningBackend
//! [`SimulationOrchestrator`]: orchestrator::SimulationOrchestrator
//! [`RoundRunner`]: round::RoundRunner
//! [`SimulationStore`]: store::SimulationStore

pub mod analysis;
pub mod backend;
pub mod config;
pub mod control;
pub mod error;
pub mod fulcrum;
pub mod memory;
pub mod orchestrator;
pub mod round;
pub mod stabilization;
pub mod store;

pub use backend::{BackendError, GeneratedResponse, GenerationRequest, ReasoningBackend};
pub use error::{PartialRoundFailure, SimulationError};
pub use orchestrator::SimulationOrchestrator;
pub use store::{InMemorySimulationStore, SimulationStore, StoreError};
