//! Guideline matches produced by matching batches

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::Guideline;
use crate::ids::GuidelineId;

/// Highest confidence a match can carry
pub const MAX_SCORE: u8 = 10;

/// Whether a guideline's action had already been carried out when it matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviouslyApplied {
    #[default]
    No,
    Partially,
    Fully,
    /// Application history does not apply (observational, journey steps)
    Irrelevant,
}

impl fmt::Display for PreviouslyApplied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Partially => write!(f, "partially"),
            Self::Fully => write!(f, "fully"),
            Self::Irrelevant => write!(f, "irrelevant"),
        }
    }
}

/// Outcome of a disambiguation batch that found an ambiguity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisambiguationOutcome {
    /// Target guidelines the customer should choose between
    pub targets: Vec<GuidelineId>,
    /// Clarification the agent should ask
    pub enriched_action: String,
}

/// Category-specific annotations on a match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAnnotations {
    #[serde(default)]
    pub previously_applied: PreviouslyApplied,
    #[serde(default)]
    pub is_continuous: bool,
    #[serde(default)]
    pub should_reapply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disambiguation: Option<DisambiguationOutcome>,
    /// Journey steps traversed this turn; `None` entries mark a journey exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_path: Option<Vec<Option<GuidelineId>>>,
    /// The journey went back to a step visited earlier instead of advancing
    #[serde(default)]
    pub requires_backtracking: bool,
}

/// A guideline judged applicable to the current turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineMatch {
    pub guideline: Guideline,
    /// Confidence in `0..=10`
    pub score: u8,
    pub rationale: String,
    #[serde(default)]
    pub annotations: MatchAnnotations,
}

impl GuidelineMatch {
    pub fn new(guideline: Guideline, score: u8, rationale: impl Into<String>) -> Self {
        Self {
            guideline,
            score: score.min(MAX_SCORE),
            rationale: rationale.into(),
            annotations: MatchAnnotations::default(),
        }
    }

    pub fn with_annotations(mut self, annotations: MatchAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn guideline_id(&self) -> &GuidelineId {
        &self.guideline.id
    }
}
