//! Enumeration types for the Cascade simulation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity roles
// ---------------------------------------------------------------------------

/// The category a stakeholder entity belongs to.
///
/// Roles condition the entity's reasoning and seed the default concern
/// categories used for gap detection when a scenario does not list its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRole {
    /// A rival organization competing in the same market.
    Competitor,
    /// A government body or standards authority.
    Regulator,
    /// Press, analysts, and commentators.
    Media,
    /// Shareholders, lenders, and venture backers.
    Investor,
    /// Buyers and end users.
    Customer,
    /// Suppliers, distributors, and alliance partners.
    Partner,
    /// Staff, unions, and internal stakeholders.
    Employee,
    /// Any stakeholder not covered by the other roles.
    Other,
}

impl EntityRole {
    /// Concern categories a stakeholder of this role is expected to raise.
    ///
    /// Used to derive gaps when the scenario declares no expected concerns.
    pub const fn default_concerns(self) -> &'static [&'static str] {
        match self {
            Self::Competitor => &["market share", "pricing"],
            Self::Regulator => &["compliance", "consumer protection"],
            Self::Media => &["public perception", "transparency"],
            Self::Investor => &["financial returns", "risk"],
            Self::Customer => &["pricing", "quality"],
            Self::Partner => &["supply chain", "contract terms"],
            Self::Employee => &["jobs", "working conditions"],
            Self::Other => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Stance
// ---------------------------------------------------------------------------

/// An entity's declared position toward the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    /// In favor of the scenario's central move.
    Supportive,
    /// Supportive only if certain conditions are met.
    Conditional,
    /// Undecided or indifferent.
    Neutral,
    /// Against the scenario's central move.
    Opposed,
}

impl Stance {
    /// Numeric position on the support axis, in `[-1.0, 1.0]`.
    pub const fn position(self) -> f64 {
        match self {
            Self::Supportive => 1.0,
            Self::Conditional => 0.5,
            Self::Neutral => 0.0,
            Self::Opposed => -1.0,
        }
    }

    /// Parse a free-form stance label as produced by a reasoning backend.
    ///
    /// Accepts the canonical names plus common synonyms. Returns `None`
    /// for anything unrecognized rather than guessing.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "supportive" | "support" | "supports" | "favorable" | "positive" | "for" => {
                Some(Self::Supportive)
            }
            "conditional" | "cautious" | "mixed" | "conditionally_supportive" => {
                Some(Self::Conditional)
            }
            "neutral" | "undecided" | "indifferent" => Some(Self::Neutral),
            "opposed" | "oppose" | "opposes" | "against" | "hostile" | "negative" => {
                Some(Self::Opposed)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulation status
// ---------------------------------------------------------------------------

/// Lifecycle status of a simulation.
///
/// `Pending -> Running -> Stabilized | MaxRoundsReached | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    /// Created but no round has started.
    Pending,
    /// The round loop is executing.
    Running,
    /// Consecutive rounds stopped changing the cross-entity structure.
    Stabilized,
    /// `max_rounds` completed without convergence.
    MaxRoundsReached,
    /// The run ended on an unrecoverable error or an abort request.
    Failed,
}

impl SimulationStatus {
    /// Whether the status is terminal (no further rounds will be appended).
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stabilized | Self::MaxRoundsReached | Self::Failed)
    }

    /// Stable lowercase label, used for persistence and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stabilized => "stabilized",
            Self::MaxRoundsReached => "max_rounds_reached",
            Self::Failed => "failed",
        }
    }
}

impl core::fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fulcrum kind
// ---------------------------------------------------------------------------

/// What a fulcrum points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulcrumKind {
    /// A specific entity's response in a specific round.
    Entity,
    /// A round-to-round transition with no single dominant entity.
    RoundTransition,
}
