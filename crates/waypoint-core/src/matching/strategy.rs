//! Strategy seam between the matcher and the batch builders

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::batch::{GuidelineMatchingBatch, ResponseAnalysisBatch};
use super::context::{ReportAnalysisContext, StrategyContext};
use crate::error::Result;
use crate::guidelines::{Guideline, GuidelineMatch};

/// Identity of a strategy; guidelines resolved to equal kinds share batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Generic,
    JourneyStepSelection,
    Custom(&'static str),
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::JourneyStepSelection => "journey_step_selection",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds batches for a group of guidelines and post-processes matches
#[async_trait]
pub trait GuidelineMatchingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn create_matching_batches(
        &self,
        guidelines: &[Guideline],
        context: Arc<StrategyContext>,
    ) -> Result<Vec<Box<dyn GuidelineMatchingBatch>>>;

    async fn create_response_analysis_batches(
        &self,
        matches: &[GuidelineMatch],
        context: Arc<ReportAnalysisContext>,
    ) -> Result<Vec<Box<dyn ResponseAnalysisBatch>>>;

    /// Rewrite the matches of the whole cycle, not only this strategy's own
    fn transform_matches(&self, matches: Vec<GuidelineMatch>) -> Vec<GuidelineMatch> {
        matches
    }
}

/// Picks the strategy responsible for a guideline
pub trait GuidelineMatchingStrategyResolver: Send + Sync {
    fn resolve(&self, guideline: &Guideline) -> Arc<dyn GuidelineMatchingStrategy>;
}
