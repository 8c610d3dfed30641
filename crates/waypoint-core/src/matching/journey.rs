//! Strategy for guidelines that project journey steps

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::batch::{GuidelineMatchingBatch, ResponseAnalysisBatch};
use super::batches::{JourneyStepSelectionBatch, JourneyStepSelectionSchema};
use super::context::{BatchContext, ReportAnalysisContext, StrategyContext};
use super::policy::{BasicOptimizationPolicy, OptimizationPolicy, TemperatureHint, TemperatureLadder};
use super::strategy::{GuidelineMatchingStrategy, StrategyKind};
use crate::error::Result;
use crate::guidelines::{Guideline, GuidelineMatch, GuidelineStore};
use crate::ids::JourneyId;
use crate::journeys::{JourneyStepGraph, JourneyStore};
use crate::nlp::SchematicGenerator;

/// Selects the next step of every journey whose steps were handed to it
///
/// Register it as a tag override on each journey's tag (`journey:<id>`) so
/// that step guidelines carrying the tag are routed here.
pub struct JourneyStepSelectionStrategy {
    generator: Arc<dyn SchematicGenerator<JourneyStepSelectionSchema>>,
    journeys: Arc<dyn JourneyStore>,
    guidelines: Arc<dyn GuidelineStore>,
    policy: Arc<dyn OptimizationPolicy>,
}

impl JourneyStepSelectionStrategy {
    pub fn new(
        generator: Arc<dyn SchematicGenerator<JourneyStepSelectionSchema>>,
        journeys: Arc<dyn JourneyStore>,
        guidelines: Arc<dyn GuidelineStore>,
    ) -> Self {
        Self {
            generator,
            journeys,
            guidelines,
            policy: Arc::new(BasicOptimizationPolicy::default()),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn OptimizationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Step guidelines grouped by journey, in first-seen order
    fn group_by_journey(guidelines: &[Guideline]) -> Vec<(JourneyId, Vec<Guideline>)> {
        let mut groups: Vec<(JourneyId, Vec<Guideline>)> = Vec::new();
        let mut index: HashMap<JourneyId, usize> = HashMap::new();

        for guideline in guidelines {
            let Some(link) = &guideline.annotations.journey_step else {
                warn!(
                    guideline_id = %guideline.id,
                    "Guideline without a journey step link routed to journey step selection; skipping"
                );
                continue;
            };

            let position = *index.entry(link.journey_id.clone()).or_insert_with(|| {
                groups.push((link.journey_id.clone(), Vec::new()));
                groups.len() - 1
            });
            groups[position].1.push(guideline.clone());
        }

        groups
    }
}

#[async_trait]
impl GuidelineMatchingStrategy for JourneyStepSelectionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::JourneyStepSelection
    }

    async fn create_matching_batches(
        &self,
        guidelines: &[Guideline],
        context: Arc<StrategyContext>,
    ) -> Result<Vec<Box<dyn GuidelineMatchingBatch>>> {
        let mut batches: Vec<Box<dyn GuidelineMatchingBatch>> = Vec::new();

        for (journey_id, mut steps) in Self::group_by_journey(guidelines) {
            let journey = self.journeys.read_journey(&journey_id).await?;

            // The graph needs every step, not only those handed in
            for step_id in &journey.steps {
                if !steps.iter().any(|g| &g.id == step_id) {
                    steps.push(self.guidelines.read_guideline(step_id).await?);
                }
            }
            let graph = JourneyStepGraph::build(&journey, &steps)?;

            let previous_path = context.session.journey_path(&journey.id);
            debug!(
                journey = %journey.title,
                steps = graph.steps().len(),
                previous_path = previous_path.len(),
                "Journey step selection batch created"
            );

            batches.push(Box::new(JourneyStepSelectionBatch::new(
                self.generator.clone(),
                journey.clone(),
                graph,
                previous_path,
                BatchContext::new(context.clone(), vec![journey]),
                TemperatureLadder::from_policy(self.policy.as_ref(), TemperatureHint::Precise),
            )));
        }

        Ok(batches)
    }

    /// Step progress is tracked through journey paths, not applied flags
    async fn create_response_analysis_batches(
        &self,
        _matches: &[GuidelineMatch],
        _context: Arc<ReportAnalysisContext>,
    ) -> Result<Vec<Box<dyn ResponseAnalysisBatch>>> {
        Ok(Vec::new())
    }
}
