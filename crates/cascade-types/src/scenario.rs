//! Scenario and stakeholder entity definitions.
//!
//! Both are immutable inputs: a scenario is loaded once at simulation start
//! and owned by the [`Simulation`](crate::Simulation) for its lifetime.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::enums::{EntityRole, Stance};
use crate::ids::{EntityId, ScenarioId};

/// The situation being simulated and the stakeholders reacting to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario identifier.
    #[serde(default)]
    pub id: ScenarioId,
    /// Short human-readable title.
    #[serde(default)]
    pub title: String,
    /// Full description of the move or event the entities react to.
    pub description: String,
    /// Industry or domain the scenario belongs to.
    #[serde(default)]
    pub industry: String,
    /// Free-form domain tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// The participating stakeholder entities.
    pub entities: Vec<SimulationEntity>,
    /// Concern categories a complete response set is expected to cover.
    ///
    /// When empty, [`Scenario::concern_categories`] derives them from the
    /// participating entities' roles.
    #[serde(default)]
    pub expected_concerns: Vec<String>,
}

impl Scenario {
    /// Look up a participating entity by ID.
    pub fn entity(&self, id: EntityId) -> Option<&SimulationEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Whether the entity belongs to this scenario's entity set.
    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.iter().any(|e| e.id == id)
    }

    /// IDs of all participating entities, in declaration order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|e| e.id).collect()
    }

    /// The concern categories used for gap detection.
    ///
    /// Returns the declared `expected_concerns` when present, otherwise the
    /// deduplicated default concerns of every participating role.
    pub fn concern_categories(&self) -> Vec<String> {
        if !self.expected_concerns.is_empty() {
            return self.expected_concerns.clone();
        }
        let derived: BTreeSet<&str> = self
            .entities
            .iter()
            .flat_map(|e| e.role.default_concerns().iter().copied())
            .collect();
        derived.into_iter().map(ToOwned::to_owned).collect()
    }
}

/// A stakeholder taking part in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEntity {
    /// Unique entity identifier.
    #[serde(default)]
    pub id: EntityId,
    /// Display name (e.g. "Federal Trade Commission").
    pub name: String,
    /// Stakeholder category.
    pub role: EntityRole,
    /// Profile used to condition the entity's reasoning.
    #[serde(default)]
    pub profile: EntityProfile,
}

/// How a stakeholder tends to think and act.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    /// Initial stance toward the scenario.
    #[serde(default = "default_stance")]
    pub stance: Stance,
    /// What this entity cares about most, in priority order.
    #[serde(default)]
    pub priorities: Vec<String>,
    /// Known behavior patterns (e.g. "litigates early", "follows the market leader").
    #[serde(default)]
    pub behavior_patterns: Vec<String>,
    /// Free-form background description.
    #[serde(default)]
    pub description: String,
}

impl Default for EntityProfile {
    fn default() -> Self {
        Self {
            stance: default_stance(),
            priorities: Vec::new(),
            behavior_patterns: Vec::new(),
            description: String::new(),
        }
    }
}

const fn default_stance() -> Stance {
    Stance::Neutral
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, role: EntityRole) -> SimulationEntity {
        SimulationEntity {
            id: EntityId::new(),
            name: name.to_owned(),
            role,
            profile: EntityProfile::default(),
        }
    }

    #[test]
    fn declared_concerns_take_precedence() {
        let scenario = Scenario {
            id: ScenarioId::new(),
            title: String::from("Merger"),
            description: String::from("Two carriers merge"),
            industry: String::from("telecom"),
            tags: Vec::new(),
            entities: vec![entity("FCC", EntityRole::Regulator)],
            expected_concerns: vec![String::from("spectrum")],
        };
        assert_eq!(scenario.concern_categories(), vec![String::from("spectrum")]);
    }

    #[test]
    fn concerns_derived_from_roles_are_deduplicated() {
        let scenario = Scenario {
            id: ScenarioId::new(),
            title: String::new(),
            description: String::from("Price hike"),
            industry: String::new(),
            tags: Vec::new(),
            entities: vec![
                entity("Rival", EntityRole::Competitor),
                entity("Shoppers", EntityRole::Customer),
            ],
            expected_concerns: Vec::new(),
        };
        let concerns = scenario.concern_categories();
        assert_eq!(
            concerns.iter().filter(|c| c.as_str() == "pricing").count(),
            1
        );
        assert!(concerns.contains(&String::from("market share")));
        assert!(concerns.contains(&String::from("quality")));
    }

    #[test]
    fn scenario_deserializes_with_defaults() {
        let json = serde_json::json!({
            "description": "A new entrant cuts prices",
            "entities": [
                {"name": "Incumbent", "role": "competitor"}
            ]
        });
        let scenario: Result<Scenario, _> = serde_json::from_value(json);
        assert!(scenario.is_ok());
        let scenario = scenario.ok();
        let first = scenario.as_ref().and_then(|s| s.entities.first());
        assert_eq!(first.map(|e| e.profile.stance), Some(Stance::Neutral));
    }
}
