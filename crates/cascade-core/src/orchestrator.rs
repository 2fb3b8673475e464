//! Simulation lifecycle controller.
//!
//! The [`SimulationOrchestrator`] owns the round loop:
//!
//! 1. validate the scenario and configuration
//! 2. for each round: build the context, run the round, apply the coverage
//!    policy, append and persist the round, check for stabilization
//! 3. once the loop ends, identify fulcrums over the full history and save
//!    the terminal simulation
//!
//! A run that cannot continue still ends in a consistent state: status
//! `Failed`, the completed rounds intact, fulcrums computed over them, all
//! returned inside [`SimulationError::Failed`].
//!
//! Each running simulation registers a [`SimulationControl`] so callers can
//! [`abort`](SimulationOrchestrator::abort) it by ID.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cascade_types::{
    RoundContext, Scenario, Simulation, SimulationConfig, SimulationId, SimulationStatus,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backend::ReasoningBackend;
use crate::control::SimulationControl;
use crate::error::SimulationError;
use crate::fulcrum;
use crate::round::RoundRunner;
use crate::stabilization::{StabilizationDetector, StabilizationVerdict};
use crate::store::{SimulationStore, StoreError};

/// Handle to a simulation running in the background.
pub type SimulationTask = JoinHandle<Result<Simulation, SimulationError>>;

/// Abort controls of the simulations currently running, by ID.
type Registry = Arc<Mutex<BTreeMap<SimulationId, Arc<SimulationControl>>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, BTreeMap<SimulationId, Arc<SimulationControl>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A simulation's entry in the running registry. Dropping it removes the
/// entry, so a run that panics or whose task is aborted is unregistered too.
#[derive(Debug)]
struct Registration {
    registry: Registry,
    id: SimulationId,
    control: Arc<SimulationControl>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.id);
    }
}

/// Drives simulations from start to a terminal status.
#[derive(Debug)]
pub struct SimulationOrchestrator<B, S> {
    backend: Arc<B>,
    store: Arc<S>,
    running: Registry,
}

impl<B, S> Clone for SimulationOrchestrator<B, S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            running: Arc::clone(&self.running),
        }
    }
}

/// Check a scenario and configuration and create the pending simulation.
///
/// # Errors
///
/// - [`SimulationError::InvalidScenario`] if the scenario has no entities
///   or repeats an entity ID.
/// - [`SimulationError::InvalidConfig`] if the configuration cannot drive
///   a run.
pub fn prepare(scenario: Scenario, config: SimulationConfig) -> Result<Simulation, SimulationError> {
    if scenario.entities.is_empty() {
        return Err(SimulationError::InvalidScenario(String::from(
            "scenario has no entities",
        )));
    }
    let mut seen = BTreeSet::new();
    for entity in &scenario.entities {
        if !seen.insert(entity.id) {
            return Err(SimulationError::InvalidScenario(format!(
                "duplicate entity id {}",
                entity.id
            )));
        }
    }
    config.validate()?;
    Ok(Simulation::new(scenario, config))
}

impl<B, S> SimulationOrchestrator<B, S>
where
    B: ReasoningBackend + 'static,
    S: SimulationStore + 'static,
{
    /// Create an orchestrator over a backend and a store.
    pub fn new(backend: Arc<B>, store: Arc<S>) -> Self {
        Self {
            backend,
            store,
            running: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// The store simulations are persisted to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run a simulation to completion and return it.
    ///
    /// # Errors
    ///
    /// Validation and initial-save errors are returned directly. Anything
    /// that ends a started run is wrapped in [`SimulationError::Failed`].
    pub async fn start(
        &self,
        scenario: Scenario,
        config: SimulationConfig,
    ) -> Result<Simulation, SimulationError> {
        let simulation = prepare(scenario, config)?;
        self.store.save(&simulation).await?;
        let registration = self.register(simulation.id);
        self.run(simulation, &registration.control).await
    }

    /// Run a simulation to completion and return its ID.
    ///
    /// The finished simulation can be read back with
    /// [`get_simulation`](Self::get_simulation).
    pub async fn start_simulation(
        &self,
        scenario: Scenario,
        config: SimulationConfig,
    ) -> Result<SimulationId, SimulationError> {
        self.start(scenario, config).await.map(|sim| sim.id)
    }

    /// Validate and save a simulation, then run it on a background task.
    ///
    /// Returns as soon as the pending simulation is persisted; poll its
    /// progress with [`get_simulation`](Self::get_simulation).
    pub async fn spawn_simulation(
        &self,
        scenario: Scenario,
        config: SimulationConfig,
    ) -> Result<(SimulationId, SimulationTask), SimulationError> {
        let simulation = prepare(scenario, config)?;
        self.store.save(&simulation).await?;
        let id = simulation.id;
        let registration = self.register(id);

        let orchestrator = self.clone();
        let task = tokio::spawn(async move {
            orchestrator.run(simulation, &registration.control).await
        });
        Ok((id, task))
    }

    /// Load a simulation from the store.
    pub async fn get_simulation(&self, id: SimulationId) -> Result<Simulation, SimulationError> {
        match self.store.load(id).await {
            Ok(simulation) => Ok(simulation),
            Err(StoreError::NotFound(_)) => Err(SimulationError::NotFound(id)),
            Err(source) => Err(SimulationError::Store { source }),
        }
    }

    /// Request that a running simulation stop.
    ///
    /// The run ends with status `Failed`, keeping every round completed
    /// before the abort.
    pub fn abort(&self, id: SimulationId) -> Result<(), SimulationError> {
        let control = lock(&self.running)
            .get(&id)
            .cloned()
            .ok_or(SimulationError::NotFound(id))?;
        info!(simulation_id = %id, "Abort requested");
        control.request_abort();
        Ok(())
    }

    /// IDs of simulations currently running.
    pub fn running(&self) -> Vec<SimulationId> {
        lock(&self.running).keys().copied().collect()
    }

    fn register(&self, id: SimulationId) -> Registration {
        let control = Arc::new(SimulationControl::new());
        lock(&self.running).insert(id, Arc::clone(&control));
        Registration {
            registry: Arc::clone(&self.running),
            id,
            control,
        }
    }

    /// The round loop.
    async fn run(
        &self,
        mut simulation: Simulation,
        control: &SimulationControl,
    ) -> Result<Simulation, SimulationError> {
        if let Err(source) = simulation.mark_running() {
            return Err(SimulationError::History { source });
        }
        self.save_snapshot(&simulation).await;
        let config = simulation.config.clone();
        let runner = RoundRunner::new(self.backend.as_ref(), &config);
        let mut detector = StabilizationDetector::new(config.stabilization.clone());
        let entity_count = simulation.scenario.entities.len();

        info!(
            simulation_id = %simulation.id,
            scenario = %simulation.scenario.title,
            entities = entity_count,
            max_rounds = config.max_rounds,
            "Simulation starting"
        );

        let mut status = SimulationStatus::MaxRoundsReached;
        for round_number in 1..=config.max_rounds {
            if control.is_abort_requested() {
                let cause = SimulationError::Cancelled { round_number };
                return Err(self.fail(simulation, cause).await);
            }

            let context = RoundContext {
                round_number,
                scenario_id: simulation.scenario.id,
                entity_ids: simulation.scenario.entity_ids(),
                prior_analysis: simulation.last_round().map(|r| r.analysis.clone()),
                memories: BTreeMap::new(),
            };

            let report = match runner
                .run(&simulation.scenario, context, &simulation.rounds, control)
                .await
            {
                Ok(report) => report,
                Err(cause) => return Err(self.fail(simulation, cause).await),
            };

            if let Some(partial) = report.partial.as_ref().filter(|partial| {
                !config.coverage.is_satisfied(partial.responded, entity_count)
            }) {
                let cause = SimulationError::PartialRoundFailure(partial.clone());
                return Err(self.fail(simulation, cause).await);
            }

            if let Err(source) = simulation.append_round(report.round) {
                return Err(self.fail(simulation, SimulationError::History { source }).await);
            }
            self.persist_last_round(&simulation).await;

            if detector.check(&simulation.rounds) == StabilizationVerdict::Stabilized {
                info!(
                    simulation_id = %simulation.id,
                    round = round_number,
                    similarity = detector.last_similarity(),
                    "Simulation stabilized"
                );
                status = SimulationStatus::Stabilized;
                break;
            }
        }

        if status == SimulationStatus::MaxRoundsReached {
            detector.mark_exhausted();
        }

        let fulcrums = fulcrum::identify(
            &simulation.scenario,
            &simulation.rounds,
            &config.stabilization.weights,
            &config.fulcrum,
        );
        if let Err(source) = simulation.finish(status, fulcrums, None) {
            return Err(self.fail(simulation, SimulationError::History { source }).await);
        }
        self.save_snapshot(&simulation).await;
        log_simulation_end(&simulation);
        Ok(simulation)
    }

    /// Close out a run that cannot continue and wrap it in
    /// [`SimulationError::Failed`].
    async fn fail(&self, mut simulation: Simulation, cause: SimulationError) -> SimulationError {
        error!(
            simulation_id = %simulation.id,
            rounds_completed = simulation.round_count(),
            error = %cause,
            "Simulation failed"
        );
        let config = &simulation.config;
        let fulcrums = fulcrum::identify(
            &simulation.scenario,
            &simulation.rounds,
            &config.stabilization.weights,
            &config.fulcrum,
        );
        if let Err(e) = simulation.finish(SimulationStatus::Failed, fulcrums, Some(cause.to_string()))
        {
            warn!(simulation_id = %simulation.id, error = %e, "Could not mark simulation failed");
        }
        self.save_snapshot(&simulation).await;
        log_simulation_end(&simulation);
        SimulationError::Failed {
            simulation: Box::new(simulation),
            cause: Box::new(cause),
        }
    }

    async fn persist_last_round(&self, simulation: &Simulation) {
        let Some(round) = simulation.last_round() else {
            return;
        };
        if let Err(e) = self.store.append_round(simulation.id, round).await {
            warn!(
                simulation_id = %simulation.id,
                round = round.round_number,
                error = %e,
                "Failed to persist round"
            );
        }
    }

    async fn save_snapshot(&self, simulation: &Simulation) {
        if let Err(e) = self.store.save(simulation).await {
            warn!(
                simulation_id = %simulation.id,
                status = %simulation.status,
                error = %e,
                "Failed to save simulation"
            );
        }
    }
}

/// Log the end of a simulation run.
pub fn log_simulation_end(simulation: &Simulation) {
    info!(
        simulation_id = %simulation.id,
        status = %simulation.status,
        rounds = simulation.round_count(),
        fulcrums = simulation.fulcrums.len(),
        failure = simulation.failure.as_deref(),
        "Simulation ended"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cascade_types::{EntityId, EntityProfile, EntityRole, ScenarioId, SimulationEntity};

    use super::*;

    fn scenario(n: usize) -> Scenario {
        Scenario {
            id: ScenarioId::new(),
            title: String::from("Validation"),
            description: String::new(),
            industry: String::new(),
            tags: Vec::new(),
            entities: (0..n)
                .map(|i| SimulationEntity {
                    id: EntityId::new(),
                    name: format!("E{i}"),
                    role: EntityRole::Customer,
                    profile: EntityProfile::default(),
                })
                .collect(),
            expected_concerns: Vec::new(),
        }
    }

    #[test]
    fn rejects_empty_scenario() {
        let result = prepare(scenario(0), SimulationConfig::default());
        assert!(matches!(result, Err(SimulationError::InvalidScenario(_))));
    }

    #[test]
    fn rejects_duplicate_entities() {
        let mut s = scenario(2);
        let first = s.entities.first().unwrap().id;
        s.entities.get_mut(1).unwrap().id = first;
        let result = prepare(s, SimulationConfig::default());
        assert!(matches!(result, Err(SimulationError::InvalidScenario(_))));
    }

    #[test]
    fn rejects_invalid_config() {
        let config = SimulationConfig {
            concurrency_limit: 0,
            ..SimulationConfig::default()
        };
        let result = prepare(scenario(1), config);
        assert!(matches!(result, Err(SimulationError::InvalidConfig { .. })));
    }

    #[test]
    fn dropped_registration_leaves_the_registry() {
        let orchestrator = SimulationOrchestrator::new(
            Arc::new(crate::backend::StubReasoningBackend::new()),
            Arc::new(crate::store::InMemorySimulationStore::new()),
        );
        let id = SimulationId::new();
        let registration = orchestrator.register(id);
        assert_eq!(orchestrator.running(), vec![id]);
        assert!(orchestrator.abort(id).is_ok());
        assert!(registration.control.is_abort_requested());

        drop(registration);
        assert!(orchestrator.running().is_empty());
        assert!(matches!(
            orchestrator.abort(id),
            Err(SimulationError::NotFound(_))
        ));
    }

    #[test]
    fn prepared_simulation_is_pending() {
        let sim = prepare(scenario(2), SimulationConfig::default()).unwrap();
        assert_eq!(sim.status, SimulationStatus::Pending);
        assert!(sim.rounds.is_empty());
    }
}
