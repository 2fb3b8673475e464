//! Durable storage interface for simulations.
//!
//! The orchestrator saves a simulation when it starts and when it reaches a
//! terminal status, and appends each round as soon as it completes, so an
//! interrupted run still leaves its finished rounds behind.
//! [`InMemorySimulationStore`] backs tests and dry runs; the PostgreSQL
//! implementation lives in `cascade-db`.

use std::collections::BTreeMap;
use std::future::Future;

use cascade_types::{HistoryViolation, Simulation, SimulationId, SimulationRound};
use tokio::sync::RwLock;

/// Errors a simulation store can report.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No simulation with this ID has been saved.
    #[error("simulation {0} not found in store")]
    NotFound(SimulationId),

    /// The stored history rejected the appended round.
    #[error("stored history rejected round: {source}")]
    Rejected {
        /// The violated invariant.
        #[from]
        source: HistoryViolation,
    },

    /// A stored document could not be encoded or decoded.
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },

    /// The storage backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence of simulations keyed by [`SimulationId`].
pub trait SimulationStore: Send + Sync {
    /// Insert or replace the full simulation.
    fn save(&self, simulation: &Simulation) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Record one completed round. Appending a round that is already stored
    /// is a no-op.
    fn append_round(
        &self,
        simulation_id: SimulationId,
        round: &SimulationRound,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Load a simulation with all of its stored rounds.
    fn load(
        &self,
        simulation_id: SimulationId,
    ) -> impl Future<Output = Result<Simulation, StoreError>> + Send;
}

/// A process-local store backed by a [`RwLock`]ed map.
#[derive(Debug, Default)]
pub struct InMemorySimulationStore {
    simulations: RwLock<BTreeMap<SimulationId, Simulation>>,
}

impl InMemorySimulationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored simulations.
    pub async fn len(&self) -> usize {
        self.simulations.read().await.len()
    }

    /// Whether the store holds no simulations.
    pub async fn is_empty(&self) -> bool {
        self.simulations.read().await.is_empty()
    }
}

impl SimulationStore for InMemorySimulationStore {
    async fn save(&self, simulation: &Simulation) -> Result<(), StoreError> {
        self.simulations
            .write()
            .await
            .insert(simulation.id, simulation.clone());
        Ok(())
    }

    async fn append_round(
        &self,
        simulation_id: SimulationId,
        round: &SimulationRound,
    ) -> Result<(), StoreError> {
        let mut simulations = self.simulations.write().await;
        let stored = simulations
            .get_mut(&simulation_id)
            .ok_or(StoreError::NotFound(simulation_id))?;
        if stored.round(round.round_number).is_some() {
            return Ok(());
        }
        stored.append_round(round.clone())?;
        Ok(())
    }

    async fn load(&self, simulation_id: SimulationId) -> Result<Simulation, StoreError> {
        self.simulations
            .read()
            .await
            .get(&simulation_id)
            .cloned()
            .ok_or(StoreError::NotFound(simulation_id))
    }
}
