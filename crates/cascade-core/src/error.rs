//! Error types for the simulation lifecycle.

use cascade_types::{ConfigViolation, EntityFailure, HistoryViolation, Simulation, SimulationId};

use crate::analysis::AnalysisError;
use crate::store::StoreError;

/// A round in which at least one entity produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialRoundFailure {
    /// The affected round.
    pub round_number: u32,
    /// Entities that exhausted their attempts or missed the round deadline.
    pub failed: Vec<EntityFailure>,
    /// Number of entities that did respond.
    pub responded: usize,
}

impl core::fmt::Display for PartialRoundFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "round {}: {} entities failed, {} responded",
            self.round_number,
            self.failed.len(),
            self.responded
        )
    }
}

/// Errors produced by the simulation orchestrator and round runner.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The scenario cannot be simulated (no entities, duplicate IDs).
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    /// The configuration cannot drive a simulation.
    #[error("invalid config: {source}")]
    InvalidConfig {
        /// The offending value.
        #[from]
        source: ConfigViolation,
    },

    /// Too few entities responded for the round to satisfy the coverage policy.
    #[error("insufficient coverage in {0}")]
    PartialRoundFailure(PartialRoundFailure),

    /// Cross-entity analysis of a round failed.
    #[error("analysis error: {source}")]
    Analysis {
        /// The underlying analysis error.
        #[from]
        source: AnalysisError,
    },

    /// The simulation was aborted while round `round_number` was in flight.
    #[error("simulation aborted during round {round_number}")]
    Cancelled {
        /// The round that was interrupted.
        round_number: u32,
    },

    /// The durable store rejected an operation.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A completed round could not be appended to the history.
    #[error("history error: {source}")]
    History {
        /// The violated invariant.
        #[from]
        source: HistoryViolation,
    },

    /// No simulation with this ID is known.
    #[error("simulation {0} not found")]
    NotFound(SimulationId),

    /// The run ended unrecoverably. Completed rounds and fulcrums computed
    /// over them are preserved in `simulation`.
    #[error("simulation {} failed: {cause}", simulation.id)]
    Failed {
        /// The terminal simulation, with status `Failed`.
        simulation: Box<Simulation>,
        /// What ended the run.
        cause: Box<SimulationError>,
    },
}

impl SimulationError {
    /// The preserved partial simulation, for [`SimulationError::Failed`].
    pub fn partial_simulation(&self) -> Option<&Simulation> {
        match self {
            Self::Failed { simulation, .. } => Some(simulation),
            _ => None,
        }
    }

    /// The innermost cause, unwrapping [`SimulationError::Failed`].
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Failed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
