//! Convergence detection over the round history.
//!
//! Two consecutive analyses are compared with a structural similarity score
//! in `[0.0, 1.0]`: the weighted mean of four Jaccard-style components.
//!
//! - **themes**: overlap of the theme label sets
//! - **coalitions**: overlap of alignment and conflict edges, tagged by polarity
//! - **gaps**: overlap of the unaddressed concern sets
//! - **stances**: share of entities declaring a stance in both rounds whose
//!   stance did not change
//!
//! Two empty sets are identical (similarity `1.0`). The detector reports
//! [`StabilizationVerdict::Stabilized`] once the last `consecutive_rounds`
//! transitions all reach the configured threshold.

use std::collections::BTreeSet;

use cascade_types::{
    CrossEntityAnalysis, EntityPair, SimilarityWeights, SimulationRound, StabilizationConfig,
};

use crate::analysis::share;

/// Outcome of a stabilization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizationVerdict {
    /// Keep running rounds.
    Continue,
    /// The cross-entity structure stopped changing.
    Stabilized,
}

/// Lifecycle of a [`StabilizationDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Still observing rounds.
    Collecting,
    /// Convergence was detected. Sticky.
    Stabilized,
    /// The round budget ran out without convergence. Sticky.
    Exhausted,
}

/// Jaccard similarity of two sets; `1.0` when both are empty.
fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    share(a.intersection(b).count(), union)
}

fn theme_set(analysis: &CrossEntityAnalysis) -> BTreeSet<&str> {
    analysis.themes.iter().map(|t| t.label.as_str()).collect()
}

fn edge_set(analysis: &CrossEntityAnalysis) -> BTreeSet<(bool, EntityPair)> {
    let coalitions = &analysis.coalitions;
    coalitions
        .alignments
        .iter()
        .map(|pair| (true, *pair))
        .chain(coalitions.conflicts.iter().map(|pair| (false, *pair)))
        .collect()
}

fn gap_set(analysis: &CrossEntityAnalysis) -> BTreeSet<&str> {
    analysis.gaps.iter().map(String::as_str).collect()
}

fn stance_agreement(a: &CrossEntityAnalysis, b: &CrossEntityAnalysis) -> f64 {
    let declared = |analysis: &CrossEntityAnalysis| -> BTreeSet<_> {
        analysis.coalitions.blocs.values().flatten().copied().collect()
    };
    let before = declared(a);
    let after = declared(b);
    if before.is_empty() && after.is_empty() {
        return 1.0;
    }
    let common: Vec<_> = before.intersection(&after).collect();
    let unchanged = common
        .iter()
        .filter(|id| a.coalitions.stance_of(***id) == b.coalitions.stance_of(***id))
        .count();
    share(unchanged, common.len())
}

/// Structural similarity of two analyses, in `[0.0, 1.0]`.
pub fn similarity(
    a: &CrossEntityAnalysis,
    b: &CrossEntityAnalysis,
    weights: &SimilarityWeights,
) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    let themes = jaccard(&theme_set(a), &theme_set(b));
    let coalitions = jaccard(&edge_set(a), &edge_set(b));
    let gaps = jaccard(&gap_set(a), &gap_set(b));
    let stances = stance_agreement(a, b);

    #[allow(clippy::arithmetic_side_effects)]
    let weighted = (weights.themes * themes
        + weights.coalitions * coalitions
        + weights.gaps * gaps
        + weights.stances * stances)
        / total;
    weighted.clamp(0.0, 1.0)
}

/// Tracks convergence across the rounds of one simulation.
#[derive(Debug, Clone)]
pub struct StabilizationDetector {
    config: StabilizationConfig,
    state: DetectorState,
    last_similarity: Option<f64>,
}

impl StabilizationDetector {
    /// Create a detector in the [`DetectorState::Collecting`] state.
    pub const fn new(config: StabilizationConfig) -> Self {
        Self {
            config,
            state: DetectorState::Collecting,
            last_similarity: None,
        }
    }

    /// Current detector state.
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Similarity of the most recent transition seen by [`check`](Self::check).
    pub const fn last_similarity(&self) -> Option<f64> {
        self.last_similarity
    }

    /// Inspect the completed history and decide whether to stop.
    ///
    /// The verdict is derived from the trailing transitions of `history`
    /// alone, so calling this twice on the same history agrees with itself.
    pub fn check(&mut self, history: &[SimulationRound]) -> StabilizationVerdict {
        match self.state {
            DetectorState::Stabilized => return StabilizationVerdict::Stabilized,
            DetectorState::Exhausted => return StabilizationVerdict::Continue,
            DetectorState::Collecting => {}
        }

        let similarities: Vec<f64> = history
            .windows(2)
            .filter_map(|pair| match pair {
                [prev, next] => Some(similarity(
                    &prev.analysis,
                    &next.analysis,
                    &self.config.weights,
                )),
                _ => None,
            })
            .collect();
        self.last_similarity = similarities.last().copied();

        let required = usize::try_from(self.config.consecutive_rounds.max(1)).unwrap_or(usize::MAX);
        let streak = similarities
            .iter()
            .rev()
            .take_while(|s| **s >= self.config.threshold)
            .count();

        if streak >= required {
            self.state = DetectorState::Stabilized;
            StabilizationVerdict::Stabilized
        } else {
            StabilizationVerdict::Continue
        }
    }

    /// Record that the round budget ran out. No effect once stabilized.
    pub fn mark_exhausted(&mut self) {
        if self.state == DetectorState::Collecting {
            self.state = DetectorState::Exhausted;
        }
    }
}
