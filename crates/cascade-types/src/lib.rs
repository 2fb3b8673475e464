//! Shared type definitions for the Cascade stakeholder simulation.
//!
//! This crate is the single source of truth for the data model used across
//! the Cascade workspace: scenarios and their entities, per-round responses
//! and memories, cross-entity analyses, fulcrums, and the [`Simulation`]
//! aggregate that owns the round history.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for scenarios, entities, simulations
//! - [`enums`] -- Roles, stances, lifecycle status, fulcrum kinds
//! - [`scenario`] -- Scenario and entity definitions
//! - [`response`] -- Entity responses, failures, and round memories
//! - [`analysis`] -- Cross-entity analysis and fulcrum results
//! - [`config`] -- Per-simulation configuration and policies
//! - [`simulation`] -- The simulation aggregate and its round log

pub mod analysis;
pub mod config;
pub mod enums;
pub mod ids;
pub mod response;
pub mod scenario;
pub mod simulation;

// Re-export all public types at crate root for convenience.
pub use analysis::{CoalitionView, CrossEntityAnalysis, EntityPair, Fulcrum, Theme};
pub use config::{
    ConfigViolation, CoveragePolicy, FulcrumPolicy, MemoryPolicy, RetryPolicy,
    SimilarityWeights, SimulationConfig, StabilizationConfig,
};
pub use enums::{EntityRole, FulcrumKind, SimulationStatus, Stance};
pub use ids::{EntityId, ScenarioId, SimulationId};
pub use response::{
    EntityFailure, EntityResponse, EntityRoundMemory, PeerExcerpt, ResponseSignals,
};
pub use scenario::{EntityProfile, Scenario, SimulationEntity};
pub use simulation::{HistoryViolation, RoundContext, Simulation, SimulationRound};
