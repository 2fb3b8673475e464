//! Simulation runner entry point for Cascade.
//!
//! The runner loads a scenario, asks an LLM how each stakeholder entity
//! reacts round after round, and prints the finished simulation as JSON on
//! stdout. Logs go to stderr.
//!
//! # Architecture
//!
//! ```text
//! Scenario --> Orchestrator --> Prompt Engine --> LLM Backend --> Parser
//!                   |                                               |
//!                   +<--------------- entity responses -------------+
//!                   |
//!                   +--> Store (PostgreSQL, or in memory)
//! ```
//!
//! Ctrl-C aborts the run; the rounds completed so far are kept and printed.

mod config;
mod error;
mod llm;
mod parse;
mod prompt;
mod reasoner;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use cascade_core::config::LoggingConfig;
use cascade_core::{InMemorySimulationStore, SimulationOrchestrator, SimulationStore};
use cascade_db::{PostgresConfig, PostgresPool, PostgresSimulationStore};
use cascade_types::{Scenario, Simulation, SimulationConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::reasoner::Reasoner;

/// Application entry point.
///
/// Loads configuration, initializes logging, builds the reasoning backend
/// and the store, then runs one simulation to a terminal status.
///
/// # Errors
///
/// Returns an error if setup fails or the simulation does not complete.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RunnerConfig::from_env().context("failed to load configuration")?;
    init_logging(&config.engine.logging);

    info!(
        scenario = %config.scenario_path.display(),
        templates_dir = config.templates_dir,
        max_rounds = config.engine.simulation.max_rounds,
        concurrency_limit = config.engine.simulation.concurrency_limit,
        "cascade-runner starting"
    );

    let scenario = load_scenario(&config.scenario_path)?;
    info!(
        scenario_id = %scenario.id,
        title = scenario.title,
        entities = scenario.entities.len(),
        "scenario loaded"
    );

    let reasoner = Arc::new(
        Reasoner::from_config(&config.backend, &config.templates_dir)
            .context("failed to set up the reasoning backend")?,
    );
    info!(
        backend = reasoner.name(),
        model = config.backend.model,
        "reasoning backend configured"
    );

    let simulation_config = config.engine.simulation.clone();
    let outcome = match PostgresConfig::from_database_config(&config.engine.database) {
        Some(pg_config) => {
            let pool = PostgresPool::connect_and_migrate(&pg_config)
                .await
                .context("failed to prepare the PostgreSQL store")?;
            let store = Arc::new(PostgresSimulationStore::new(pool.clone()));
            let outcome = run(reasoner, store, scenario, simulation_config).await;
            pool.close().await;
            outcome
        }
        None => {
            info!("DATABASE_URL not set, keeping the simulation in memory");
            let store = Arc::new(InMemorySimulationStore::new());
            run(reasoner, store, scenario, simulation_config).await
        }
    };

    let simulation = outcome?;
    print_simulation(&simulation)?;
    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level; `LOG_FORMAT=json` forces JSON output.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let json = logging.json
        || std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read a scenario from a JSON file.
fn load_scenario(path: &Path) -> Result<Scenario, RunnerError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RunnerError::Scenario(format!("{}: {e}", path.display())))?;
    let scenario: Scenario = serde_json::from_str(&text)?;
    if scenario.entities.is_empty() {
        return Err(RunnerError::Scenario(format!(
            "{}: scenario has no entities",
            path.display()
        )));
    }
    Ok(scenario)
}

/// Run one simulation in the background until it ends or Ctrl-C aborts it.
///
/// A failed run still prints the rounds it completed before the error is
/// returned.
async fn run<S>(
    reasoner: Arc<Reasoner>,
    store: Arc<S>,
    scenario: Scenario,
    config: SimulationConfig,
) -> anyhow::Result<Simulation>
where
    S: SimulationStore + 'static,
{
    let orchestrator = SimulationOrchestrator::new(reasoner, store);
    let (id, mut task) = orchestrator
        .spawn_simulation(scenario, config)
        .await
        .context("failed to start simulation")?;
    info!(simulation_id = %id, "simulation started");

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!(simulation_id = %id, "interrupt received, aborting simulation");
            if let Err(e) = orchestrator.abort(id) {
                warn!(simulation_id = %id, error = %e, "simulation was no longer running");
            }
            task.await
        }
    };

    match joined.context("simulation task panicked")? {
        Ok(simulation) => Ok(simulation),
        Err(err) => {
            if let Some(partial) = err.partial_simulation() {
                print_simulation(partial)?;
            }
            Err(anyhow::Error::new(err).context(format!("simulation {id} did not complete")))
        }
    }
}

/// Write a simulation to stdout as pretty-printed JSON.
fn print_simulation(simulation: &Simulation) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(simulation).context("failed to encode simulation")?;
    println!("{json}");
    Ok(())
}
