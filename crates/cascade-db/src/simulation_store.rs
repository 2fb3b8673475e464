//! Simulation persistence on the `simulations` and `simulation_rounds`
//! tables.
//!
//! A simulation is one row holding its scenario, configuration, status, and
//! fulcrums; each completed round is one row in the append-only round log.
//! Saving upserts the simulation row and inserts any rounds not yet stored,
//! so a save after a missed append still leaves a complete history.

use cascade_core::{SimulationStore, StoreError};
use cascade_types::{Simulation, SimulationId, SimulationRound, SimulationStatus};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PostgresPool;

/// [`SimulationStore`] backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PostgresSimulationStore {
    pool: PostgresPool,
}

impl PostgresSimulationStore {
    /// Create a store on an existing pool. Migrations must already be applied.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    fn pg(&self) -> &PgPool {
        self.pool.pool()
    }

    /// Insert or update a simulation and any rounds not yet stored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a statement fails, or
    /// [`DbError::Serialization`] if a document cannot be encoded.
    pub async fn upsert(&self, simulation: &Simulation) -> Result<(), DbError> {
        let mut tx = self.pg().begin().await?;

        sqlx::query(
            r"INSERT INTO simulations
                (id, scenario_id, title, status, scenario, config, fulcrums, failure,
                 created_at, updated_at, completed_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
              ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                fulcrums = EXCLUDED.fulcrums,
                failure = EXCLUDED.failure,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at",
        )
        .bind(simulation.id.into_inner())
        .bind(simulation.scenario.id.into_inner())
        .bind(&simulation.scenario.title)
        .bind(simulation.status.as_str())
        .bind(serde_json::to_value(&simulation.scenario)?)
        .bind(serde_json::to_value(&simulation.config)?)
        .bind(serde_json::to_value(&simulation.fulcrums)?)
        .bind(simulation.failure.as_deref())
        .bind(simulation.created_at)
        .bind(simulation.updated_at)
        .bind(simulation.completed_at)
        .execute(&mut *tx)
        .await?;

        for round in &simulation.rounds {
            insert_round(&mut tx, simulation.id, round).await?;
        }

        tx.commit().await?;
        tracing::debug!(
            simulation_id = %simulation.id,
            status = %simulation.status,
            rounds = simulation.rounds.len(),
            "Saved simulation"
        );
        Ok(())
    }

    /// Append one round after checking it against the stored history.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] for an unknown simulation and
    /// [`DbError::Rejected`] if the round would break the history.
    pub async fn append(
        &self,
        simulation_id: SimulationId,
        round: &SimulationRound,
    ) -> Result<(), DbError> {
        let mut stored = self.fetch(simulation_id).await?;
        if stored.round(round.round_number).is_some() {
            return Ok(());
        }
        stored.append_round(round.clone())?;

        let mut tx = self.pg().begin().await?;
        insert_round(&mut tx, simulation_id, round).await?;
        sqlx::query(r"UPDATE simulations SET updated_at = $2 WHERE id = $1")
            .bind(simulation_id.into_inner())
            .bind(stored.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(
            simulation_id = %simulation_id,
            round = round.round_number,
            "Appended round"
        );
        Ok(())
    }

    /// Load a simulation with all of its rounds, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if no such simulation is stored, or
    /// [`DbError::Corrupt`] / [`DbError::Serialization`] if a row cannot be
    /// decoded.
    pub async fn fetch(&self, simulation_id: SimulationId) -> Result<Simulation, DbError> {
        let row = sqlx::query_as::<_, SimulationRow>(
            r"SELECT id, scenario_id, title, status, scenario, config, fulcrums, failure,
                     created_at, updated_at, completed_at
              FROM simulations
              WHERE id = $1",
        )
        .bind(simulation_id.into_inner())
        .fetch_optional(self.pg())
        .await?
        .ok_or(DbError::NotFound(simulation_id))?;

        let rounds = sqlx::query_as::<_, RoundRow>(
            r"SELECT round_number, round
              FROM simulation_rounds
              WHERE simulation_id = $1
              ORDER BY round_number ASC",
        )
        .bind(simulation_id.into_inner())
        .fetch_all(self.pg())
        .await?;

        row.into_simulation(rounds)
    }

    /// List stored simulations, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn list(&self, limit: i64) -> Result<Vec<SimulationSummaryRow>, DbError> {
        let rows = sqlx::query_as::<_, SimulationSummaryRow>(
            r"SELECT s.id, s.title, s.status,
                     COUNT(r.round_number)::INTEGER AS round_count,
                     s.created_at, s.completed_at
              FROM simulations s
              LEFT JOIN simulation_rounds r ON r.simulation_id = s.id
              GROUP BY s.id
              ORDER BY s.created_at DESC
              LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pg())
        .await?;

        Ok(rows)
    }

    /// Delete a simulation and its rounds.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn delete(&self, simulation_id: SimulationId) -> Result<bool, DbError> {
        let result = sqlx::query(r"DELETE FROM simulations WHERE id = $1")
            .bind(simulation_id.into_inner())
            .execute(self.pg())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl SimulationStore for PostgresSimulationStore {
    async fn save(&self, simulation: &Simulation) -> Result<(), StoreError> {
        Ok(self.upsert(simulation).await?)
    }

    async fn append_round(
        &self,
        simulation_id: SimulationId,
        round: &SimulationRound,
    ) -> Result<(), StoreError> {
        Ok(self.append(simulation_id, round).await?)
    }

    async fn load(&self, simulation_id: SimulationId) -> Result<Simulation, StoreError> {
        Ok(self.fetch(simulation_id).await?)
    }
}

/// Insert a round unless it is already stored.
async fn insert_round(
    conn: &mut PgConnection,
    simulation_id: SimulationId,
    round: &SimulationRound,
) -> Result<(), DbError> {
    sqlx::query(
        r"INSERT INTO simulation_rounds
            (simulation_id, round_number, round, response_count, failure_count,
             started_at, completed_at)
          VALUES ($1, $2, $3, $4, $5, $6, $7)
          ON CONFLICT (simulation_id, round_number) DO NOTHING",
    )
    .bind(simulation_id.into_inner())
    .bind(i32::try_from(round.round_number).unwrap_or(i32::MAX))
    .bind(serde_json::to_value(round)?)
    .bind(i32::try_from(round.responses.len()).unwrap_or(i32::MAX))
    .bind(i32::try_from(round.failures.len()).unwrap_or(i32::MAX))
    .bind(round.started_at)
    .bind(round.completed_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// A row from the `simulations` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SimulationRow {
    id: Uuid,
    scenario_id: Uuid,
    title: String,
    status: String,
    scenario: serde_json::Value,
    config: serde_json::Value,
    fulcrums: serde_json::Value,
    failure: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SimulationRow {
    fn into_simulation(self, rounds: Vec<RoundRow>) -> Result<Simulation, DbError> {
        let scenario: cascade_types::Scenario = serde_json::from_value(self.scenario)?;
        if scenario.id.into_inner() != self.scenario_id {
            return Err(DbError::Corrupt(format!(
                "simulation {} stores scenario {} but its document says {}",
                self.id, self.scenario_id, scenario.id
            )));
        }
        tracing::trace!(simulation_id = %self.id, title = %self.title, "Decoding simulation");

        let id = SimulationId::from(self.id);
        let rounds = decode_rounds(id, rounds)?;

        Ok(Simulation {
            id,
            scenario,
            config: serde_json::from_value(self.config)?,
            rounds,
            status: parse_status(&self.status)?,
            fulcrums: serde_json::from_value(self.fulcrums)?,
            failure: self.failure,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

/// A row from the `simulation_rounds` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct RoundRow {
    round_number: i32,
    round: serde_json::Value,
}

/// Decode round rows ordered by `round_number`. The log must run 1, 2, 3,
/// ... without gaps, and each document must carry its row's number.
fn decode_rounds(
    simulation_id: SimulationId,
    rows: Vec<RoundRow>,
) -> Result<Vec<SimulationRound>, DbError> {
    let mut rounds: Vec<SimulationRound> = Vec::with_capacity(rows.len());
    for (expected, row) in (1_u32..).zip(rows) {
        if u32::try_from(row.round_number).ok() != Some(expected) {
            return Err(DbError::Corrupt(format!(
                "simulation {simulation_id} stores round {} where round {expected} belongs",
                row.round_number
            )));
        }
        let round: SimulationRound = serde_json::from_value(row.round)?;
        if round.round_number != expected {
            return Err(DbError::Corrupt(format!(
                "simulation {simulation_id} row {expected} holds round {}",
                round.round_number
            )));
        }
        rounds.push(round);
    }
    Ok(rounds)
}

/// Listing view of a stored simulation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SimulationSummaryRow {
    /// Simulation UUID.
    pub id: Uuid,
    /// Scenario title.
    pub title: String,
    /// Lifecycle status (`running`, `stabilized`, ...).
    pub status: String,
    /// Number of stored rounds.
    pub round_count: i32,
    /// When the simulation was created.
    pub created_at: DateTime<Utc>,
    /// When the simulation reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Map a stored status string back to a [`SimulationStatus`].
fn parse_status(status: &str) -> Result<SimulationStatus, DbError> {
    serde_json::from_value(serde_json::Value::String(status.to_owned()))
        .map_err(|_| DbError::Corrupt(format!("unknown simulation status {status:?}")))
}
