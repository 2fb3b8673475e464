//! Per-entity memory construction.
//!
//! Before each round, every entity gets an [`EntityRoundMemory`]: all of its
//! own earlier responses plus a bounded, ranked selection of what other
//! entities said most recently. Only completed rounds are visible, so no
//! entity ever sees another's response from the round being played.

use std::collections::{BTreeMap, BTreeSet};

use cascade_types::{
    CrossEntityAnalysis, EntityId, EntityResponse, EntityRoundMemory, MemoryPolicy, PeerExcerpt,
    SimulationRound,
};

use crate::analysis::response_labels;

/// Truncate a string to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text.get(..byte_index).unwrap_or(text).to_owned(),
        None => text.to_owned(),
    }
}

/// Build the memory an entity reasons with in `round_number`.
///
/// `history` holds the completed rounds, oldest first. Round 1 (or an empty
/// history) yields an empty memory.
pub fn build(
    entity_id: EntityId,
    round_number: u32,
    history: &[SimulationRound],
    policy: &MemoryPolicy,
) -> EntityRoundMemory {
    let Some(prior) = history.last() else {
        return EntityRoundMemory::empty(entity_id, round_number);
    };
    if round_number <= 1 {
        return EntityRoundMemory::empty(entity_id, round_number);
    }

    let own_responses: Vec<EntityResponse> = history
        .iter()
        .filter_map(|round| round.response_of(entity_id))
        .cloned()
        .collect();
    let own_labels = own_responses
        .last()
        .map(response_labels)
        .unwrap_or_default();

    let mut peers: Vec<PeerExcerpt> = latest_peer_responses(entity_id, history)
        .into_values()
        .map(|response| {
            let relevance = relevance(entity_id, &own_labels, response, &prior.analysis);
            PeerExcerpt {
                entity_id: response.entity_id,
                round_number: response.round_number,
                stance: response.signals.stance,
                themes: response.signals.themes.clone(),
                excerpt: truncate_chars(&response.content, policy.max_excerpt_chars),
                relevance,
            }
        })
        .collect();
    peers.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    peers.truncate(policy.max_peer_responses);

    EntityRoundMemory {
        entity_id,
        round_number,
        own_responses,
        peer_responses: peers,
    }
}

/// Every other entity's most recent response across the history.
fn latest_peer_responses(
    entity_id: EntityId,
    history: &[SimulationRound],
) -> BTreeMap<EntityId, &EntityResponse> {
    let mut latest = BTreeMap::new();
    for round in history.iter().rev() {
        for response in &round.responses {
            if response.entity_id != entity_id {
                latest.entry(response.entity_id).or_insert(response);
            }
        }
    }
    latest
}

/// Ranking score of a peer: shared themes (+1 each), conflict (+2),
/// alignment (+1), and the peer's influence in the prior round.
fn relevance(
    entity_id: EntityId,
    own_labels: &BTreeSet<String>,
    peer: &EntityResponse,
    prior: &CrossEntityAnalysis,
) -> f64 {
    let shared = response_labels(peer).intersection(own_labels).count();
    let mut score = f64::from(u32::try_from(shared).unwrap_or(u32::MAX));
    #[allow(clippy::arithmetic_side_effects)]
    {
        if prior.coalitions.in_conflict(entity_id, peer.entity_id) {
            score += 2.0;
        }
        if prior.coalitions.aligned(entity_id, peer.entity_id) {
            score += 1.0;
        }
        score += prior.influence_of(peer.entity_id);
    }
    score
}
