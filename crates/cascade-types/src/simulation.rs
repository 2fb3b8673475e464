//! The simulation aggregate and its append-only round log.
//!
//! [`Simulation`] is the only place rounds are stored. Every mutation goes
//! through [`Simulation::append_round`] or [`Simulation::finish`], which
//! enforce the structural invariants of the history:
//!
//! - round numbers are contiguous starting at 1
//! - no more than `max_rounds` rounds are appended
//! - every response and failure references a scenario entity, once per round
//! - each round carries exactly one analysis, for that round
//! - a terminal simulation is never mutated again

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{CrossEntityAnalysis, Fulcrum};
use crate::config::SimulationConfig;
use crate::enums::SimulationStatus;
use crate::ids::{EntityId, ScenarioId, SimulationId};
use crate::response::{EntityFailure, EntityResponse, EntityRoundMemory};
use crate::scenario::Scenario;

/// A rejected mutation of a [`Simulation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryViolation {
    /// The simulation already reached a terminal status.
    #[error("simulation is already {0}")]
    Terminal(SimulationStatus),

    /// The appended round does not directly follow the last one.
    #[error("expected round {expected}, got round {actual}")]
    NonContiguousRound {
        /// The round number that would keep the log contiguous.
        expected: u32,
        /// The round number that was offered.
        actual: u32,
    },

    /// Appending would exceed the configured round limit.
    #[error("round {round} exceeds max_rounds {max_rounds}")]
    RoundLimit {
        /// The offered round number.
        round: u32,
        /// The configured limit.
        max_rounds: u32,
    },

    /// A response or failure names an entity outside the scenario.
    #[error("entity {0} is not part of the scenario")]
    UnknownEntity(EntityId),

    /// An entity produced more than one outcome in the same round.
    #[error("entity {0} appears more than once in the round")]
    DuplicateEntity(EntityId),

    /// A response, context, or analysis is labelled with a different round.
    #[error("{component} is labelled round {actual}, expected {expected}")]
    RoundMismatch {
        /// Which part of the round is mislabelled.
        component: &'static str,
        /// The round being appended.
        expected: u32,
        /// The label found on the component.
        actual: u32,
    },

    /// `finish` was called with a non-terminal status.
    #[error("{0} is not a terminal status")]
    NotTerminal(SimulationStatus),
}

/// The input snapshot for one round.
///
/// Holds a copy of the previous round's analysis rather than a reference
/// into the history, so a context is self-contained once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundContext {
    /// The round this context drives.
    pub round_number: u32,
    /// The scenario under simulation.
    pub scenario_id: ScenarioId,
    /// Participating entities, in scenario order.
    pub entity_ids: Vec<EntityId>,
    /// The analysis of round `n - 1`; `None` for round 1.
    pub prior_analysis: Option<CrossEntityAnalysis>,
    /// Memory built for each entity this round.
    #[serde(default)]
    pub memories: BTreeMap<EntityId, EntityRoundMemory>,
}

/// One completed round. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRound {
    /// 1-based round number.
    pub round_number: u32,
    /// The context the round ran with.
    pub context: RoundContext,
    /// Responses received, in scenario entity order.
    pub responses: Vec<EntityResponse>,
    /// Entities that produced no response.
    #[serde(default)]
    pub failures: Vec<EntityFailure>,
    /// Cross-entity analysis of this round's responses.
    pub analysis: CrossEntityAnalysis,
    /// When the round started.
    pub started_at: DateTime<Utc>,
    /// When the round's analysis completed.
    pub completed_at: DateTime<Utc>,
}

impl SimulationRound {
    /// The response an entity gave this round, if it responded.
    pub fn response_of(&self, id: EntityId) -> Option<&EntityResponse> {
        self.responses.iter().find(|r| r.entity_id == id)
    }
}

/// Aggregate root for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    /// Unique simulation identifier.
    pub id: SimulationId,
    /// The scenario being simulated.
    pub scenario: Scenario,
    /// Configuration fixed at start.
    pub config: SimulationConfig,
    /// Append-only round log, indexed by `round_number - 1`.
    pub rounds: Vec<SimulationRound>,
    /// Lifecycle status.
    pub status: SimulationStatus,
    /// Leverage points, populated once the loop terminates.
    #[serde(default)]
    pub fulcrums: Vec<Fulcrum>,
    /// Cause of failure, for [`SimulationStatus::Failed`].
    #[serde(default)]
    pub failure: Option<String>,
    /// When the simulation was created.
    pub created_at: DateTime<Utc>,
    /// When the simulation was last mutated.
    pub updated_at: DateTime<Utc>,
    /// When the simulation reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Simulation {
    /// Create a pending simulation.
    pub fn new(scenario: Scenario, config: SimulationConfig) -> Self {
        let now = Utc::now();
        Self {
            id: SimulationId::new(),
            scenario,
            config,
            rounds: Vec::new(),
            status: SimulationStatus::Pending,
            fulcrums: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the simulation has reached a terminal status.
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of completed rounds.
    pub fn round_count(&self) -> u32 {
        u32::try_from(self.rounds.len()).unwrap_or(u32::MAX)
    }

    /// The most recently appended round.
    pub fn last_round(&self) -> Option<&SimulationRound> {
        self.rounds.last()
    }

    /// The round with the given 1-based number.
    pub fn round(&self, round_number: u32) -> Option<&SimulationRound> {
        let index = usize::try_from(round_number.checked_sub(1)?).ok()?;
        self.rounds.get(index)
    }

    /// Move a pending simulation to [`SimulationStatus::Running`].
    pub fn mark_running(&mut self) -> Result<(), HistoryViolation> {
        if self.is_terminal() {
            return Err(HistoryViolation::Terminal(self.status));
        }
        self.status = SimulationStatus::Running;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append a completed round, enforcing the history invariants.
    pub fn append_round(&mut self, round: SimulationRound) -> Result<(), HistoryViolation> {
        if self.is_terminal() {
            return Err(HistoryViolation::Terminal(self.status));
        }

        let expected = self.round_count().saturating_add(1);
        if round.round_number != expected {
            return Err(HistoryViolation::NonContiguousRound {
                expected,
                actual: round.round_number,
            });
        }
        if round.round_number > self.config.max_rounds {
            return Err(HistoryViolation::RoundLimit {
                round: round.round_number,
                max_rounds: self.config.max_rounds,
            });
        }

        check_label("context", expected, round.context.round_number)?;
        check_label("analysis", expected, round.analysis.round_number)?;

        let mut seen = BTreeSet::new();
        for response in &round.responses {
            check_label("response", expected, response.round_number)?;
            self.check_entity(response.entity_id, &mut seen)?;
        }
        for failure in &round.failures {
            self.check_entity(failure.entity_id, &mut seen)?;
        }

        self.rounds.push(round);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to a terminal status and attach the fulcrums.
    pub fn finish(
        &mut self,
        status: SimulationStatus,
        fulcrums: Vec<Fulcrum>,
        failure: Option<String>,
    ) -> Result<(), HistoryViolation> {
        if self.is_terminal() {
            return Err(HistoryViolation::Terminal(self.status));
        }
        if !status.is_terminal() {
            return Err(HistoryViolation::NotTerminal(status));
        }
        let now = Utc::now();
        self.status = status;
        self.fulcrums = fulcrums;
        self.failure = failure;
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    fn check_entity(
        &self,
        id: EntityId,
        seen: &mut BTreeSet<EntityId>,
    ) -> Result<(), HistoryViolation> {
        if !self.scenario.contains_entity(id) {
            return Err(HistoryViolation::UnknownEntity(id));
        }
        if !seen.insert(id) {
            return Err(HistoryViolation::DuplicateEntity(id));
        }
        Ok(())
    }
}

const fn check_label(
    component: &'static str,
    expected: u32,
    actual: u32,
) -> Result<(), HistoryViolation> {
    if expected == actual {
        Ok(())
    } else {
        Err(HistoryViolation::RoundMismatch {
            component,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CoalitionView;
    use crate::enums::EntityRole;
    use crate::response::ResponseSignals;
    use crate::scenario::{EntityProfile, SimulationEntity};

    fn scenario(n: usize) -> Scenario {
        Scenario {
            id: ScenarioId::new(),
            title: String::from("Test"),
            description: String::from("A test scenario"),
            industry: String::new(),
            tags: Vec::new(),
            entities: (0..n)
                .map(|i| SimulationEntity {
                    id: EntityId::new(),
                    name: format!("Entity {i}"),
                    role: EntityRole::Other,
                    profile: EntityProfile::default(),
                })
                .collect(),
            expected_concerns: Vec::new(),
        }
    }

    fn round(sim: &Simulation, number: u32, responders: &[EntityId]) -> SimulationRound {
        let now = Utc::now();
        SimulationRound {
            round_number: number,
            context: RoundContext {
                round_number: number,
                scenario_id: sim.scenario.id,
                entity_ids: sim.scenario.entity_ids(),
                prior_analysis: None,
                memories: BTreeMap::new(),
            },
            responses: responders
                .iter()
                .map(|id| EntityResponse {
                    entity_id: *id,
                    round_number: number,
                    content: String::from("ok"),
                    signals: ResponseSignals::default(),
                    responded_at: now,
                })
                .collect(),
            failures: Vec::new(),
            analysis: CrossEntityAnalysis {
                round_number: number,
                themes: Vec::new(),
                coalitions: CoalitionView::default(),
                influence: BTreeMap::new(),
                gaps: Vec::new(),
            },
            started_at: now,
            completed_at: now,
        }
    }

    #[test]
    fn appends_contiguous_rounds() {
        let mut sim = Simulation::new(scenario(2), SimulationConfig::default());
        let ids = sim.scenario.entity_ids();
        let r1 = round(&sim, 1, &ids);
        assert_eq!(sim.append_round(r1), Ok(()));
        let r2 = round(&sim, 2, &ids);
        assert_eq!(sim.append_round(r2), Ok(()));
        assert_eq!(sim.round_count(), 2);
        assert_eq!(sim.round(2).map(|r| r.round_number), Some(2));
        assert!(sim.round(0).is_none());
    }

    #[test]
    fn rejects_gap_in_round_numbers() {
        let mut sim = Simulation::new(scenario(1), SimulationConfig::default());
        let ids = sim.scenario.entity_ids();
        let r3 = round(&sim, 3, &ids);
        assert_eq!(
            sim.append_round(r3),
            Err(HistoryViolation::NonContiguousRound {
                expected: 1,
                actual: 3
            })
        );
    }

    #[test]
    fn rejects_rounds_beyond_limit() {
        let config = SimulationConfig {
            max_rounds: 1,
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(scenario(1), config);
        let ids = sim.scenario.entity_ids();
        let r1 = round(&sim, 1, &ids);
        assert_eq!(sim.append_round(r1), Ok(()));
        let r2 = round(&sim, 2, &ids);
        assert!(matches!(
            sim.append_round(r2),
            Err(HistoryViolation::RoundLimit { .. })
        ));
    }

    #[test]
    fn rejects_foreign_and_duplicate_entities() {
        let mut sim = Simulation::new(scenario(1), SimulationConfig::default());
        let stranger = EntityId::new();
        let r1 = round(&sim, 1, &[stranger]);
        assert_eq!(
            sim.append_round(r1),
            Err(HistoryViolation::UnknownEntity(stranger))
        );

        let known = sim.scenario.entity_ids();
        let twice: Vec<EntityId> = known.iter().chain(known.iter()).copied().collect();
        let r1 = round(&sim, 1, &twice);
        assert!(matches!(
            sim.append_round(r1),
            Err(HistoryViolation::DuplicateEntity(_))
        ));
    }

    #[test]
    fn rejects_mislabelled_analysis() {
        let mut sim = Simulation::new(scenario(1), SimulationConfig::default());
        let ids = sim.scenario.entity_ids();
        let mut r1 = round(&sim, 1, &ids);
        r1.analysis.round_number = 2;
        assert!(matches!(
            sim.append_round(r1),
            Err(HistoryViolation::RoundMismatch {
                component: "analysis",
                ..
            })
        ));
    }

    #[test]
    fn terminal_simulation_is_frozen() {
        let mut sim = Simulation::new(scenario(1), SimulationConfig::default());
        assert_eq!(
            sim.finish(SimulationStatus::Running, Vec::new(), None),
            Err(HistoryViolation::NotTerminal(SimulationStatus::Running))
        );
        assert_eq!(
            sim.finish(SimulationStatus::MaxRoundsReached, Vec::new(), None),
            Ok(())
        );
        assert!(sim.completed_at.is_some());

        let ids = sim.scenario.entity_ids();
        let r1 = round(&sim, 1, &ids);
        assert_eq!(
            sim.append_round(r1),
            Err(HistoryViolation::Terminal(SimulationStatus::MaxRoundsReached))
        );
        assert!(sim.mark_running().is_err());
    }
}
