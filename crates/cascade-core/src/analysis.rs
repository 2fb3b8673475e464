//! Cross-entity analysis of a single round.
//!
//! [`analyze`] turns one round's responses into a [`CrossEntityAnalysis`]:
//! normalized themes with the entities that raised them, stance blocs with
//! pairwise alignment and conflict edges, per-entity influence, and the
//! expected concern categories nobody addressed.
//!
//! The function is pure. It depends only on the set of responses passed in
//! (never on their order) and on the expected concern list, so repeated
//! calls over the same round yield identical results.

use std::collections::{BTreeMap, BTreeSet};

use cascade_types::{
    CoalitionView, CrossEntityAnalysis, EntityId, EntityPair, EntityResponse, Stance, Theme,
};

/// Errors produced while analyzing a round.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// No entity responded, so there is nothing to analyze.
    #[error("round {round_number} has no responses to analyze")]
    EmptyRound {
        /// The empty round.
        round_number: u32,
    },

    /// A response belongs to another round.
    #[error("response from entity {entity_id} is labelled round {actual}, expected {expected}")]
    ForeignResponse {
        /// The offending entity.
        entity_id: EntityId,
        /// The round being analyzed.
        expected: u32,
        /// The response's own round label.
        actual: u32,
    },

    /// An entity responded more than once in the round.
    #[error("entity {0} responded more than once")]
    DuplicateResponse(EntityId),
}

/// Normalize a theme or concern label: trim, lowercase, collapse whitespace.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized, non-empty labels of one response.
pub fn response_labels(response: &EntityResponse) -> BTreeSet<String> {
    response
        .signals
        .labels()
        .map(normalize_label)
        .filter(|l| !l.is_empty())
        .collect()
}

/// `numerator / denominator` as a share in `[0.0, 1.0]`; `0.0` for an empty denominator.
pub(crate) fn share(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    let num = f64::from(u32::try_from(numerator).unwrap_or(u32::MAX));
    let den = f64::from(u32::try_from(denominator).unwrap_or(u32::MAX));
    #[allow(clippy::arithmetic_side_effects)]
    let ratio = num / den;
    ratio.clamp(0.0, 1.0)
}

/// Analyze the responses of one round.
///
/// `expected_concerns` are the concern categories a complete response set
/// should cover; callers pass [`Scenario::concern_categories`].
///
/// [`Scenario::concern_categories`]: cascade_types::Scenario::concern_categories
pub fn analyze(
    round_number: u32,
    responses: &[EntityResponse],
    expected_concerns: &[String],
) -> Result<CrossEntityAnalysis, AnalysisError> {
    if responses.is_empty() {
        return Err(AnalysisError::EmptyRound { round_number });
    }

    let mut labels_by_entity: BTreeMap<EntityId, BTreeSet<String>> = BTreeMap::new();
    let mut stances: BTreeMap<EntityId, Stance> = BTreeMap::new();
    for response in responses {
        if response.round_number != round_number {
            return Err(AnalysisError::ForeignResponse {
                entity_id: response.entity_id,
                expected: round_number,
                actual: response.round_number,
            });
        }
        if labels_by_entity
            .insert(response.entity_id, response_labels(response))
            .is_some()
        {
            return Err(AnalysisError::DuplicateResponse(response.entity_id));
        }
        if let Some(stance) = response.signals.stance {
            stances.insert(response.entity_id, stance);
        }
    }

    let themes = collect_themes(&labels_by_entity);
    let coalitions = build_coalitions(&stances);
    let influence = compute_influence(&labels_by_entity);
    let gaps = find_gaps(&themes, expected_concerns);

    Ok(CrossEntityAnalysis {
        round_number,
        themes,
        coalitions,
        influence,
        gaps,
    })
}

fn collect_themes(labels_by_entity: &BTreeMap<EntityId, BTreeSet<String>>) -> Vec<Theme> {
    let mut raisers: BTreeMap<&str, BTreeSet<EntityId>> = BTreeMap::new();
    for (entity_id, labels) in labels_by_entity {
        for label in labels {
            raisers.entry(label.as_str()).or_default().insert(*entity_id);
        }
    }

    let mut themes: Vec<Theme> = raisers
        .into_iter()
        .map(|(label, raised_by)| Theme {
            label: label.to_owned(),
            raised_by,
        })
        .collect();
    themes.sort_by(|a, b| {
        b.raised_by
            .len()
            .cmp(&a.raised_by.len())
            .then_with(|| a.label.cmp(&b.label))
    });
    themes
}

fn build_coalitions(stances: &BTreeMap<EntityId, Stance>) -> CoalitionView {
    let mut view = CoalitionView::default();
    for (entity_id, stance) in stances {
        view.blocs.entry(*stance).or_default().insert(*entity_id);
    }

    let declared: Vec<(EntityId, Stance)> = stances.iter().map(|(id, s)| (*id, *s)).collect();
    for (i, (a, stance_a)) in declared.iter().enumerate() {
        for (b, stance_b) in declared.iter().skip(i.saturating_add(1)) {
            #[allow(clippy::arithmetic_side_effects)]
            let product = stance_a.position() * stance_b.position();
            let both_neutral = *stance_a == Stance::Neutral && *stance_b == Stance::Neutral;
            if product > 0.0 || both_neutral {
                view.alignments.push(EntityPair::new(*a, *b));
            } else if product < 0.0 {
                view.conflicts.push(EntityPair::new(*a, *b));
            }
        }
    }
    view.alignments.sort();
    view.conflicts.sort();
    view
}

fn compute_influence(
    labels_by_entity: &BTreeMap<EntityId, BTreeSet<String>>,
) -> BTreeMap<EntityId, f64> {
    let others = labels_by_entity.len().saturating_sub(1);
    labels_by_entity
        .iter()
        .map(|(entity_id, own)| {
            let picked_up = labels_by_entity
                .iter()
                .filter(|(other, labels)| *other != entity_id && !labels.is_disjoint(own))
                .count();
            (*entity_id, share(picked_up, others))
        })
        .collect()
}

fn find_gaps(themes: &[Theme], expected_concerns: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    expected_concerns
        .iter()
        .map(|c| normalize_label(c))
        .filter(|concern| !concern.is_empty() && seen.insert(concern.clone()))
        .filter(|concern| {
            !themes.iter().any(|theme| {
                theme.label.contains(concern.as_str()) || concern.contains(theme.label.as_str())
            })
        })
        .collect()
}
