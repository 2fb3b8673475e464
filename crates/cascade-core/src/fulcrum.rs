//! Post-hoc identification of leverage points.
//!
//! Runs once, over the full history, after the round loop has terminated.
//! A transition `r -> r+1` moved the system by `delta = 1 - similarity`.
//! An entity is a fulcrum candidate for round `r` when the themes it raised
//! in `r` were newly taken up by others in `r + 1`, or when its own stance
//! moved into round `r`:
//!
//! `score = delta(r -> r+1) * (0.6 * adoption + 0.4 * shift)`
//!
//! When no entity qualifies but some transition still moved the system, the
//! largest transition is reported on its own.

use std::collections::BTreeSet;

use cascade_types::{
    CrossEntityAnalysis, EntityId, Fulcrum, FulcrumKind, FulcrumPolicy, Scenario,
    SimilarityWeights, SimulationRound,
};

use crate::analysis::share;
use crate::stabilization::similarity;

const ADOPTION_WEIGHT: f64 = 0.6;
const SHIFT_WEIGHT: f64 = 0.4;

/// One scored (entity, round) pair before ranking.
#[derive(Debug, Clone)]
struct Candidate {
    entity_id: EntityId,
    round: u32,
    score: f64,
    adopted: Vec<String>,
    adopters: usize,
    peers: usize,
    shift: f64,
    delta: f64,
}

/// Rank the fulcrums of a finished history.
///
/// Returns an empty list for histories with fewer than two rounds.
pub fn identify(
    scenario: &Scenario,
    history: &[SimulationRound],
    weights: &SimilarityWeights,
    policy: &FulcrumPolicy,
) -> Vec<Fulcrum> {
    if history.len() <= 1 || policy.max_fulcrums == 0 {
        return Vec::new();
    }

    let deltas: Vec<(u32, f64)> = history
        .windows(2)
        .filter_map(|pair| match pair {
            [prev, next] => {
                let s = similarity(&prev.analysis, &next.analysis, weights);
                #[allow(clippy::arithmetic_side_effects)]
                let delta = (1.0 - s).clamp(0.0, 1.0);
                Some((prev.round_number, delta))
            }
            _ => None,
        })
        .collect();

    let mut candidates: Vec<Candidate> = Vec::new();
    for (index, (round, delta)) in deltas.iter().enumerate() {
        let (Some(current), Some(next)) = (history.get(index), history.get(index.saturating_add(1)))
        else {
            continue;
        };
        let previous = index.checked_sub(1).and_then(|i| history.get(i));
        for response in &current.responses {
            let candidate = score_candidate(response.entity_id, *round, *delta, previous, current, next);
            if candidate.score > policy.min_score {
                candidates.push(candidate);
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.round.cmp(&b.round))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    if candidates.is_empty() {
        return largest_transition(&deltas, policy).into_iter().collect();
    }

    candidates
        .into_iter()
        .take(policy.max_fulcrums)
        .map(|c| entity_fulcrum(scenario, c))
        .collect()
}

fn score_candidate(
    entity_id: EntityId,
    round: u32,
    delta: f64,
    previous: Option<&SimulationRound>,
    current: &SimulationRound,
    next: &SimulationRound,
) -> Candidate {
    let raised = current.analysis.themes_raised_by(entity_id);
    let peers: Vec<EntityId> = next
        .responses
        .iter()
        .map(|r| r.entity_id)
        .filter(|id| *id != entity_id)
        .collect();

    let mut adopted: BTreeSet<&str> = BTreeSet::new();
    let mut adopters = 0_usize;
    for peer in &peers {
        let newly = newly_raised(&current.analysis, &next.analysis, *peer, &raised);
        if !newly.is_empty() {
            adopters = adopters.saturating_add(1);
            adopted.extend(newly);
        }
    }
    let adoption = share(adopters, peers.len());
    let shift = stance_shift(entity_id, previous, current);

    #[allow(clippy::arithmetic_side_effects)]
    let score = delta * (ADOPTION_WEIGHT * adoption + SHIFT_WEIGHT * shift);

    Candidate {
        entity_id,
        round,
        score,
        adopted: adopted.into_iter().map(ToOwned::to_owned).collect(),
        adopters,
        peers: peers.len(),
        shift,
        delta,
    }
}

/// Themes from `raised` that `peer` raises in `next` but did not raise in `current`.
fn newly_raised<'a>(
    current: &CrossEntityAnalysis,
    next: &CrossEntityAnalysis,
    peer: EntityId,
    raised: &BTreeSet<&'a str>,
) -> Vec<&'a str> {
    let before = current.themes_raised_by(peer);
    let after = next.themes_raised_by(peer);
    raised
        .iter()
        .copied()
        .filter(|label| after.contains(label) && !before.contains(label))
        .collect()
}

/// Normalized stance movement of an entity into `current`, in `[0.0, 1.0]`.
///
/// A declared `stance_shift` wins; otherwise the position change from the
/// previous round is used (zero in round 1 or without two declared stances).
fn stance_shift(
    entity_id: EntityId,
    previous: Option<&SimulationRound>,
    current: &SimulationRound,
) -> f64 {
    let response = current.response_of(entity_id);
    if let Some(declared) = response.and_then(|r| r.signals.stance_shift) {
        #[allow(clippy::arithmetic_side_effects)]
        let normalized = declared.abs() / 2.0;
        return normalized.clamp(0.0, 1.0);
    }
    let now = response.and_then(|r| r.signals.stance);
    let before = previous
        .and_then(|round| round.response_of(entity_id))
        .and_then(|r| r.signals.stance);
    match (before, now) {
        (Some(before), Some(now)) => {
            #[allow(clippy::arithmetic_side_effects)]
            let moved = (now.position() - before.position()).abs() / 2.0;
            moved.clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

fn entity_fulcrum(scenario: &Scenario, candidate: Candidate) -> Fulcrum {
    let name = scenario
        .entity(candidate.entity_id)
        .map_or_else(|| candidate.entity_id.to_string(), |e| e.name.clone());
    let next_round = candidate.round.saturating_add(1);

    let mut parts = Vec::new();
    if !candidate.adopted.is_empty() {
        parts.push(format!(
            "themes [{}] were taken up by {} of {} peers in round {next_round}",
            candidate.adopted.join(", "),
            candidate.adopters,
            candidate.peers,
        ));
    }
    if candidate.shift > 0.0 {
        parts.push(format!("its stance moved by {:.2}", candidate.shift));
    }
    let rationale = format!(
        "{name} in round {}: {}; round {} -> {next_round} changed the structure by {:.2}",
        candidate.round,
        parts.join("; "),
        candidate.round,
        candidate.delta,
    );

    Fulcrum {
        kind: FulcrumKind::Entity,
        entity_id: Some(candidate.entity_id),
        rounds: vec![candidate.round],
        score: candidate.score,
        rationale,
    }
}

fn largest_transition(deltas: &[(u32, f64)], policy: &FulcrumPolicy) -> Option<Fulcrum> {
    let (round, delta) = deltas
        .iter()
        .copied()
        .filter(|(_, delta)| *delta > policy.min_score)
        .reduce(|best, item| if item.1 > best.1 { item } else { best })?;
    let next_round = round.saturating_add(1);
    Some(Fulcrum {
        kind: FulcrumKind::RoundTransition,
        entity_id: None,
        rounds: vec![round, next_round],
        score: delta,
        rationale: format!(
            "no single entity drove the change; round {round} -> {next_round} shifted the structure by {delta:.2}"
        ),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeMap;

    use cascade_types::{
        EntityProfile, EntityResponse, EntityRole, ResponseSignals, RoundContext, ScenarioId,
        SimulationEntity, Stance,
    };
    use chrono::Utc;

    use super::*;
    use crate::analysis::analyze;

    fn scenario(names: &[&str]) -> Scenario {
        Scenario {
            id: ScenarioId::new(),
            title: String::from("Test"),
            description: String::new(),
            industry: String::new(),
            tags: Vec::new(),
            entities: names
                .iter()
                .map(|name| SimulationEntity {
                    id: EntityId::new(),
                    name: (*name).to_owned(),
                    role: EntityRole::Other,
                    profile: EntityProfile::default(),
                })
                .collect(),
            expected_concerns: Vec::new(),
        }
    }

    fn round(number: u32, entries: &[(EntityId, Stance, Vec<&str>)]) -> SimulationRound {
        let responses: Vec<EntityResponse> = entries
            .iter()
            .map(|(id, stance, themes)| EntityResponse {
                entity_id: *id,
                round_number: number,
                content: String::new(),
                signals: ResponseSignals {
                    stance: Some(*stance),
                    stance_shift: None,
                    concerns: Vec::new(),
                    proposed_actions: Vec::new(),
                    themes: themes.iter().map(|s| (*s).to_owned()).collect(),
                },
                responded_at: Utc::now(),
            })
            .collect();
        SimulationRound {
            round_number: number,
            context: RoundContext {
                round_number: number,
                scenario_id: ScenarioId::new(),
                entity_ids: Vec::new(),
                prior_analysis: None,
                memories: BTreeMap::new(),
            },
            analysis: analyze(number, &responses, &[]).unwrap(),
            responses,
            failures: Vec::new(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    fn ids(scenario: &Scenario) -> Vec<EntityId> {
        scenario.entity_ids()
    }

    #[test]
    fn single_round_has_no_fulcrums() {
        let s = scenario(&["A"]);
        let a = *ids(&s).first().unwrap();
        let history = vec![round(1, &[(a, Stance::Neutral, vec!["x"])])];
        let fulcrums = identify(&s, &history, &SimilarityWeights::default(), &FulcrumPolicy::default());
        assert!(fulcrums.is_empty());
    }

    #[test]
    fn theme_originator_is_the_fulcrum() {
        let s = scenario(&["Leader", "Follower1", "Follower2"]);
        let v = ids(&s);
        let (a, b, c) = (v[0], v[1], v[2]);
        let history = vec![
            round(
                1,
                &[
                    (a, Stance::Opposed, vec!["antitrust"]),
                    (b, Stance::Neutral, vec!["growth"]),
                    (c, Stance::Neutral, vec!["growth"]),
                ],
            ),
            round(
                2,
                &[
                    (a, Stance::Opposed, vec!["antitrust"]),
                    (b, Stance::Neutral, vec!["antitrust"]),
                    (c, Stance::Neutral, vec!["antitrust"]),
                ],
            ),
        ];
        let fulcrums = identify(&s, &history, &SimilarityWeights::default(), &FulcrumPolicy::default());
        let top = fulcrums.first().unwrap();
        assert_eq!(top.kind, FulcrumKind::Entity);
        assert_eq!(top.entity_id, Some(a));
        assert_eq!(top.rounds, vec![1]);
        assert!(top.rationale.contains("Leader"));
        assert!(top.rationale.contains("antitrust"));
    }

    #[test]
    fn fulcrums_are_ranked_and_capped() {
        let s = scenario(&["A", "B", "C", "D"]);
        let v = ids(&s);
        let (a, b, c, d) = (v[0], v[1], v[2], v[3]);
        let history = vec![
            round(
                1,
                &[
                    (a, Stance::Supportive, vec!["one"]),
                    (b, Stance::Supportive, vec!["two"]),
                    (c, Stance::Opposed, vec!["three"]),
                    (d, Stance::Opposed, vec!["four"]),
                ],
            ),
            round(
                2,
                &[
                    (a, Stance::Opposed, vec!["two", "three"]),
                    (b, Stance::Opposed, vec!["one"]),
                    (c, Stance::Supportive, vec!["one", "two"]),
                    (d, Stance::Supportive, vec!["one"]),
                ],
            ),
        ];
        let policy = FulcrumPolicy {
            max_fulcrums: 2,
            min_score: 0.0,
        };
        let fulcrums = identify(&s, &history, &SimilarityWeights::default(), &policy);
        assert_eq!(fulcrums.len(), 2);
        let first = fulcrums.first().unwrap();
        let second = fulcrums.get(1).unwrap();
        assert!(first.score >= second.score);
        // "one" was adopted by three peers, more than any other theme.
        assert_eq!(first.entity_id, Some(a));
    }

    #[test]
    fn falls_back_to_largest_transition() {
        let s = scenario(&["A", "B"]);
        let v = ids(&s);
        let (a, b) = (v[0], v[1]);
        let history = vec![
            round(1, &[(a, Stance::Neutral, vec!["x"]), (b, Stance::Neutral, vec!["y"])]),
            round(2, &[(a, Stance::Neutral, vec!["p"]), (b, Stance::Neutral, vec!["q"])]),
            round(3, &[(a, Stance::Neutral, vec!["p"]), (b, Stance::Neutral, vec!["q"])]),
        ];
        let fulcrums = identify(&s, &history, &SimilarityWeights::default(), &FulcrumPolicy::default());
        assert_eq!(fulcrums.len(), 1);
        let only = fulcrums.first().unwrap();
        assert_eq!(only.kind, FulcrumKind::RoundTransition);
        assert_eq!(only.entity_id, None);
        assert_eq!(only.rounds, vec![1, 2]);
    }

    #[test]
    fn static_history_has_no_fulcrums() {
        let s = scenario(&["A"]);
        let a = *ids(&s).first().unwrap();
        let history = vec![
            round(1, &[(a, Stance::Neutral, vec!["x"])]),
            round(2, &[(a, Stance::Neutral, vec!["x"])]),
        ];
        let fulcrums = identify(&s, &history, &SimilarityWeights::default(), &FulcrumPolicy::default());
        assert!(fulcrums.is_empty());
    }

    #[test]
    fn score_must_exceed_the_minimum() {
        let s = scenario(&["A"]);
        let a = *ids(&s).first().unwrap();
        let history = vec![
            round(1, &[(a, Stance::Neutral, vec!["x"])]),
            round(2, &[(a, Stance::Neutral, vec!["x"])]),
        ];
        // Identical rounds score exactly zero, which does not clear a zero floor.
        let policy = FulcrumPolicy {
            max_fulcrums: 3,
            min_score: 0.0,
        };
        let fulcrums = identify(&s, &history, &SimilarityWeights::default(), &policy);
        assert!(fulcrums.is_empty());
    }
}
