//! Per-entity round output and the bounded memory handed to each entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::Stance;
use crate::ids::EntityId;

/// Structured signals extracted from an entity's response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSignals {
    /// Declared stance this round, if the entity stated one.
    #[serde(default)]
    pub stance: Option<Stance>,
    /// Self-reported stance movement since the previous round, in `[-2.0, 2.0]`.
    #[serde(default)]
    pub stance_shift: Option<f64>,
    /// Concerns the entity raised.
    #[serde(default)]
    pub concerns: Vec<String>,
    /// Concrete actions the entity proposes or announces.
    #[serde(default)]
    pub proposed_actions: Vec<String>,
    /// Topics the entity's response touches on.
    #[serde(default)]
    pub themes: Vec<String>,
}

impl ResponseSignals {
    /// Every theme-like label in the response (`themes` then `concerns`).
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.themes
            .iter()
            .chain(self.concerns.iter())
            .map(String::as_str)
    }
}

/// One entity's reasoned response in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResponse {
    /// The responding entity.
    pub entity_id: EntityId,
    /// The round this response belongs to.
    pub round_number: u32,
    /// Free-form reasoning text.
    pub content: String,
    /// Structured signals extracted from the response.
    #[serde(default)]
    pub signals: ResponseSignals,
    /// When the response was received.
    pub responded_at: DateTime<Utc>,
}

/// Recorded placeholder for an entity that produced no response in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    /// The entity that failed to respond.
    pub entity_id: EntityId,
    /// Number of backend calls made before giving up.
    pub attempts: u32,
    /// Human-readable reason for the final failure.
    pub reason: String,
}

/// A truncated view of another entity's most recent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerExcerpt {
    /// The peer entity.
    pub entity_id: EntityId,
    /// The round the excerpt comes from.
    pub round_number: u32,
    /// The peer's declared stance in that round.
    pub stance: Option<Stance>,
    /// The peer's themes in that round.
    pub themes: Vec<String>,
    /// Response text, truncated to the memory policy's excerpt limit.
    pub excerpt: String,
    /// Ranking score used to select this peer.
    pub relevance: f64,
}

/// What one entity is allowed to see of the history when reasoning in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRoundMemory {
    /// The entity this memory belongs to.
    pub entity_id: EntityId,
    /// The round the memory was built for.
    pub round_number: u32,
    /// All of the entity's own prior responses, oldest first.
    pub own_responses: Vec<EntityResponse>,
    /// Selected peer responses, most relevant first.
    pub peer_responses: Vec<PeerExcerpt>,
}

impl EntityRoundMemory {
    /// An empty memory, as handed to every entity in round 1.
    pub const fn empty(entity_id: EntityId, round_number: u32) -> Self {
        Self {
            entity_id,
            round_number,
            own_responses: Vec::new(),
            peer_responses: Vec::new(),
        }
    }

    /// Whether the memory holds nothing from prior rounds.
    pub fn is_empty(&self) -> bool {
        self.own_responses.is_empty() && self.peer_responses.is_empty()
    }

    /// The entity's most recent own response, if any.
    pub fn latest_own(&self) -> Option<&EntityResponse> {
        self.own_responses.last()
    }
}
