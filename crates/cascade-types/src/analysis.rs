//! Cross-entity analysis and fulcrum result types.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::enums::{FulcrumKind, Stance};
use crate::ids::EntityId;

/// A normalized topic and the entities that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    /// Normalized label (trimmed, lowercased, whitespace collapsed).
    pub label: String,
    /// Entities that raised the theme this round.
    pub raised_by: BTreeSet<EntityId>,
}

/// An unordered pair of entities, stored with the smaller ID first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityPair {
    /// The smaller of the two IDs.
    pub first: EntityId,
    /// The larger of the two IDs.
    pub second: EntityId,
}

impl EntityPair {
    /// Build a pair, normalizing the order so `(a, b)` and `(b, a)` compare equal.
    pub fn new(a: EntityId, b: EntityId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// Whether the pair includes the given entity.
    pub fn contains(&self, id: EntityId) -> bool {
        self.first == id || self.second == id
    }

    /// The other member of the pair, if `id` is one of them.
    pub fn partner_of(&self, id: EntityId) -> Option<EntityId> {
        if self.first == id {
            Some(self.second)
        } else if self.second == id {
            Some(self.first)
        } else {
            None
        }
    }
}

/// Stance blocs and the alignment/conflict edges between entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalitionView {
    /// Entities grouped by declared stance.
    pub blocs: BTreeMap<Stance, BTreeSet<EntityId>>,
    /// Pairs whose stances sit on the same side.
    pub alignments: Vec<EntityPair>,
    /// Pairs whose stances sit on opposite sides.
    pub conflicts: Vec<EntityPair>,
}

impl CoalitionView {
    /// The stance an entity declared this round, if any.
    pub fn stance_of(&self, id: EntityId) -> Option<Stance> {
        self.blocs
            .iter()
            .find(|(_, members)| members.contains(&id))
            .map(|(stance, _)| *stance)
    }

    /// Whether the two entities are recorded as aligned.
    pub fn aligned(&self, a: EntityId, b: EntityId) -> bool {
        self.alignments.contains(&EntityPair::new(a, b))
    }

    /// Whether the two entities are recorded as in conflict.
    pub fn in_conflict(&self, a: EntityId, b: EntityId) -> bool {
        self.conflicts.contains(&EntityPair::new(a, b))
    }
}

/// The emergent cross-entity structure of a single round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossEntityAnalysis {
    /// The round this analysis describes.
    pub round_number: u32,
    /// Themes, most widely raised first.
    pub themes: Vec<Theme>,
    /// Stance blocs and pairwise edges.
    pub coalitions: CoalitionView,
    /// Share of other responders that picked up each entity's themes.
    pub influence: BTreeMap<EntityId, f64>,
    /// Expected concern categories no entity addressed.
    pub gaps: Vec<String>,
}

impl CrossEntityAnalysis {
    /// Labels of every theme the entity raised this round.
    pub fn themes_raised_by(&self, id: EntityId) -> BTreeSet<&str> {
        self.themes
            .iter()
            .filter(|t| t.raised_by.contains(&id))
            .map(|t| t.label.as_str())
            .collect()
    }

    /// Influence score for an entity, `0.0` when it did not respond.
    pub fn influence_of(&self, id: EntityId) -> f64 {
        self.influence.get(&id).copied().unwrap_or(0.0)
    }
}

/// A decision point or entity whose behavior most changed the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fulcrum {
    /// Whether this fulcrum names an entity or only a round transition.
    pub kind: FulcrumKind,
    /// The pivotal entity, for [`FulcrumKind::Entity`].
    pub entity_id: Option<EntityId>,
    /// The round(s) involved: `[r]` for an entity, `[r, r + 1]` for a transition.
    pub rounds: Vec<u32>,
    /// Leverage score in `[0.0, 1.0]`.
    pub score: f64,
    /// Human-readable explanation.
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_order_independent() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert_eq!(EntityPair::new(a, b), EntityPair::new(b, a));
        let pair = EntityPair::new(a, b);
        assert_eq!(pair.partner_of(a), Some(b));
        assert_eq!(pair.partner_of(EntityId::new()), None);
    }

    #[test]
    fn coalition_lookup() {
        let a = EntityId::new();
        let b = EntityId::new();
        let mut view = CoalitionView::default();
        view.blocs.entry(Stance::Opposed).or_default().insert(a);
        view.blocs.entry(Stance::Opposed).or_default().insert(b);
        view.alignments.push(EntityPair::new(a, b));
        assert_eq!(view.stance_of(a), Some(Stance::Opposed));
        assert!(view.aligned(b, a));
        assert!(!view.in_conflict(a, b));
    }

    #[test]
    fn analysis_json_keys_round_trip() {
        let a = EntityId::new();
        let mut view = CoalitionView::default();
        view.blocs.entry(Stance::Supportive).or_default().insert(a);
        let analysis = CrossEntityAnalysis {
            round_number: 1,
            themes: Vec::new(),
            coalitions: view,
            influence: BTreeMap::from([(a, 0.5)]),
            gaps: vec![String::from("jobs")],
        };
        let json = serde_json::to_string(&analysis).unwrap_or_default();
        let back: Option<CrossEntityAnalysis> = serde_json::from_str(&json).ok();
        assert_eq!(back, Some(analysis));
    }
}
