//! Guideline matching
//!
//! A matching cycle takes the usable guidelines of a turn, routes each one
//! to a strategy, lets every strategy build batches, and runs all batches
//! concurrently against their oracles:
//!
//! ```text
//! guidelines ──▶ resolver ──▶ strategy ──▶ batches ──▶ oracle ──▶ matches
//!                                │                                  │
//!                                └────────── transform ◀────────────┘
//! ```

mod batch;
pub mod batches;
mod categorizer;
mod context;
mod generic;
mod journey;
mod matcher;
mod policy;
mod resolver;
mod retry;
mod strategy;

pub use batch::{
    AnalyzedGuideline, GuidelineMatchingBatch, GuidelineMatchingBatchResult,
    GuidelineMatchingResult, ResponseAnalysisBatch, ResponseAnalysisBatchResult,
    ResponseAnalysisResult,
};
pub use categorizer::{
    CategorizedGuidelines, DisambiguationGroup, GuidelineCategory, categorize,
    categorize_with_known_targets, disambiguation_targets,
};
pub use context::{BatchContext, ReportAnalysisContext, StrategyContext};
pub use generic::{GenericGuidelineMatchingStrategy, MatchingGenerators, transform_disambiguation_matches};
pub use journey::JourneyStepSelectionStrategy;
pub use matcher::GuidelineMatcher;
pub use policy::{
    BasicOptimizationPolicy, OptimizationPolicy, TemperatureHint, TemperatureLadder, partition,
};
pub use resolver::GenericStrategyResolver;
pub use retry::{RetryPolicy, execute_with_retry};
pub use strategy::{GuidelineMatchingStrategy, GuidelineMatchingStrategyResolver, StrategyKind};
