//! `PostgreSQL` persistence for Cascade simulations.
//!
//! The orchestrator writes through the
//! [`SimulationStore`](cascade_core::SimulationStore) trait; this crate
//! provides the durable implementation of it. A simulation is stored as
//! one header row plus an append-only log of completed rounds.
//!
//! ```text
//! SimulationOrchestrator
//!     |
//!     +-- start ----------> save          (header, status = running)
//!     +-- each round -----> append_round  (simulation_rounds row)
//!     +-- finish ---------> save          (status, fulcrums, completed_at)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`simulation_store`] -- Simulation and round persistence
//! - [`error`] -- Shared error types

pub mod error;
pub mod postgres;
pub mod simulation_store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use simulation_store::{PostgresSimulationStore, SimulationSummaryRow};
