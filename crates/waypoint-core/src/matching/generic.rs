//! Default strategy: categorize, partition and batch every guideline kind

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::batch::{GuidelineMatchingBatch, ResponseAnalysisBatch};
use super::batches::{
    ActionableBatch, ActionableMatchesSchema, CustomerDependentBatch,
    CustomerDependentMatchesSchema, DisambiguationBatch, DisambiguationMatchesSchema,
    ObservationalBatch, ObservationalMatchesSchema, PreviouslyAppliedBatch,
    PreviouslyAppliedDetectionBatch, PreviouslyAppliedMatchesSchema, ResponseAnalysisSchema,
};
use super::categorizer::{GuidelineCategory, categorize_with_known_targets, disambiguation_targets};
use super::context::{BatchContext, ReportAnalysisContext, StrategyContext};
use super::policy::{
    BasicOptimizationPolicy, OptimizationPolicy, TemperatureHint, TemperatureLadder, partition,
};
use super::strategy::{GuidelineMatchingStrategy, StrategyKind};
use crate::entity_queries::EntityQueries;
use crate::error::Result;
use crate::guidelines::{Guideline, GuidelineMatch, MAX_SCORE};
use crate::ids::GuidelineId;
use crate::journeys::Journey;
use crate::nlp::SchematicGenerator;
use crate::relationships::RelationshipStore;

/// One oracle per structured output the generic strategy asks for
#[derive(Clone)]
pub struct MatchingGenerators {
    pub observational: Arc<dyn SchematicGenerator<ObservationalMatchesSchema>>,
    pub actionable: Arc<dyn SchematicGenerator<ActionableMatchesSchema>>,
    pub previously_applied: Arc<dyn SchematicGenerator<PreviouslyAppliedMatchesSchema>>,
    pub customer_dependent: Arc<dyn SchematicGenerator<CustomerDependentMatchesSchema>>,
    pub disambiguation: Arc<dyn SchematicGenerator<DisambiguationMatchesSchema>>,
    pub response_analysis: Arc<dyn SchematicGenerator<ResponseAnalysisSchema>>,
}

pub struct GenericGuidelineMatchingStrategy {
    generators: MatchingGenerators,
    relationships: Arc<dyn RelationshipStore>,
    entity_queries: Arc<EntityQueries>,
    policy: Arc<dyn OptimizationPolicy>,
}

impl GenericGuidelineMatchingStrategy {
    pub fn new(
        generators: MatchingGenerators,
        relationships: Arc<dyn RelationshipStore>,
        entity_queries: Arc<EntityQueries>,
    ) -> Self {
        Self {
            generators,
            relationships,
            entity_queries,
            policy: Arc::new(BasicOptimizationPolicy::default()),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn OptimizationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    fn ladder(&self, hint: TemperatureHint) -> TemperatureLadder {
        TemperatureLadder::from_policy(self.policy.as_ref(), hint)
    }

    fn chunks(&self, bucket: &[Guideline]) -> Vec<Vec<Guideline>> {
        partition(bucket, self.policy.guideline_matching_batch_count(bucket.len()))
    }

    async fn relevant_journeys(&self, guidelines: &[Guideline]) -> Result<Vec<Journey>> {
        let mut journeys: Vec<Journey> = Vec::new();
        for guideline in guidelines {
            for journey in self
                .entity_queries
                .find_journeys_on_which_this_guideline_depends(&guideline.id)
                .await?
            {
                if !journeys.iter().any(|j| j.id == journey.id) {
                    journeys.push(journey);
                }
            }
        }
        Ok(journeys)
    }

    async fn batch_context(
        &self,
        context: &Arc<StrategyContext>,
        guidelines: &[Guideline],
    ) -> Result<BatchContext> {
        Ok(BatchContext::new(
            context.clone(),
            self.relevant_journeys(guidelines).await?,
        ))
    }
}

#[async_trait]
impl GuidelineMatchingStrategy for GenericGuidelineMatchingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Generic
    }

    async fn create_matching_batches(
        &self,
        guidelines: &[Guideline],
        context: Arc<StrategyContext>,
    ) -> Result<Vec<Box<dyn GuidelineMatchingBatch>>> {
        let targets = disambiguation_targets(self.relationships.as_ref(), guidelines).await?;

        // Targets resolved to other strategies still complete a group here
        let present: HashSet<&GuidelineId> = guidelines.iter().map(|g| &g.id).collect();
        let mut missing: Vec<GuidelineId> = Vec::new();
        for id in targets.values().flatten() {
            if !present.contains(id) && !missing.contains(id) {
                missing.push(id.clone());
            }
        }
        let known_targets = self.entity_queries.find_guidelines(&missing).await?;

        let categorized = categorize_with_known_targets(
            guidelines,
            &known_targets,
            &context.session.agent_state.applied_guideline_ids,
            &targets,
        );

        debug!(
            observational = categorized.count(GuidelineCategory::Observational),
            disambiguation = categorized.count(GuidelineCategory::Disambiguation),
            continuous = categorized.count(GuidelineCategory::Continuous),
            customer_dependent = categorized.count(GuidelineCategory::PreviouslyAppliedCustomerDependent),
            previously_applied = categorized.count(GuidelineCategory::PreviouslyApplied),
            actionable = categorized.count(GuidelineCategory::Actionable),
            "Guidelines categorized"
        );

        let mut batches: Vec<Box<dyn GuidelineMatchingBatch>> = Vec::new();

        for chunk in self.chunks(&categorized.observational) {
            let ctx = self.batch_context(&context, &chunk).await?;
            batches.push(Box::new(ObservationalBatch::new(
                self.generators.observational.clone(),
                chunk,
                ctx,
                self.ladder(TemperatureHint::Matching),
            )));
        }

        for chunk in self.chunks(&categorized.previously_applied) {
            let ctx = self.batch_context(&context, &chunk).await?;
            batches.push(Box::new(PreviouslyAppliedBatch::new(
                self.generators.previously_applied.clone(),
                chunk,
                ctx,
                self.ladder(TemperatureHint::Matching),
            )));
        }

        for chunk in self.chunks(&categorized.previously_applied_customer_dependent) {
            let ctx = self.batch_context(&context, &chunk).await?;
            batches.push(Box::new(CustomerDependentBatch::new(
                self.generators.customer_dependent.clone(),
                chunk,
                ctx,
                self.ladder(TemperatureHint::Matching),
            )));
        }

        for chunk in self.chunks(&categorized.actionable) {
            let ctx = self.batch_context(&context, &chunk).await?;
            batches.push(Box::new(ActionableBatch::new(
                self.generators.actionable.clone(),
                chunk,
                ctx,
                self.ladder(TemperatureHint::Matching),
            )));
        }

        for chunk in self.chunks(&categorized.continuous) {
            let ctx = self.batch_context(&context, &chunk).await?;
            batches.push(Box::new(ActionableBatch::continuous(
                self.generators.actionable.clone(),
                chunk,
                ctx,
                self.ladder(TemperatureHint::Matching),
            )));
        }

        for group in categorized.disambiguation_groups {
            let ctx = self
                .batch_context(&context, std::slice::from_ref(&group.head))
                .await?;
            batches.push(Box::new(DisambiguationBatch::new(
                self.generators.disambiguation.clone(),
                group.head,
                group.targets,
                ctx,
                self.ladder(TemperatureHint::Precise),
            )));
        }

        Ok(batches)
    }

    async fn create_response_analysis_batches(
        &self,
        matches: &[GuidelineMatch],
        context: Arc<ReportAnalysisContext>,
    ) -> Result<Vec<Box<dyn ResponseAnalysisBatch>>> {
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![Box::new(PreviouslyAppliedDetectionBatch::new(
            self.generators.response_analysis.clone(),
            matches,
            context,
            self.ladder(TemperatureHint::Matching),
        ))])
    }

    fn transform_matches(&self, matches: Vec<GuidelineMatch>) -> Vec<GuidelineMatch> {
        transform_disambiguation_matches(matches)
    }
}

/// Replace fired disambiguation heads with a synthesized clarification
///
/// Each head match becomes a match on a transient, untagged guideline that
/// keeps the head's condition and carries the clarification as its action.
/// The head and every target it names are removed from the result. Already
/// synthesized matches pass through unchanged.
pub fn transform_disambiguation_matches(matches: Vec<GuidelineMatch>) -> Vec<GuidelineMatch> {
    let mut heads = HashSet::new();
    let mut superseded = HashSet::new();
    let mut synthesized = Vec::new();

    for m in &matches {
        let Some(outcome) = &m.annotations.disambiguation else {
            continue;
        };
        if m.guideline_id().is_transient() {
            continue;
        }

        heads.insert(m.guideline_id().clone());
        superseded.extend(outcome.targets.iter().cloned());

        let clarification = Guideline::actionable(
            m.guideline.content.condition.clone(),
            outcome.enriched_action.clone(),
        )
        .with_id(GuidelineId::transient());

        debug!(
            head = %m.guideline_id(),
            targets = outcome.targets.len(),
            transient = %clarification.id,
            "Disambiguation replaced by clarification"
        );

        synthesized.push(
            GuidelineMatch::new(clarification, MAX_SCORE, m.rationale.clone())
                .with_annotations(m.annotations.clone()),
        );
    }

    if synthesized.is_empty() {
        return matches;
    }

    synthesized.extend(matches.into_iter().filter(|m| {
        !heads.contains(m.guideline_id()) && !superseded.contains(m.guideline_id())
    }));
    synthesized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidelines::{DisambiguationOutcome, MatchAnnotations};

    fn matched(id: &str) -> GuidelineMatch {
        GuidelineMatch::new(
            Guideline::actionable(format!("when {}", id), format!("do {}", id)).with_id(id),
            8,
            "matched",
        )
    }

    fn head(targets: &[&str]) -> GuidelineMatch {
        GuidelineMatch::new(
            Guideline::observational("the customer received the wrong item")
                .with_id("head")
                .with_tags(vec!["orders".into()]),
            MAX_SCORE,
            "ambiguous",
        )
        .with_annotations(MatchAnnotations {
            disambiguation: Some(DisambiguationOutcome {
                targets: targets.iter().map(|t| GuidelineId::from(*t)).collect(),
                enriched_action: "ask whether they want a refund or a replacement".to_string(),
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_targets_and_head_are_replaced() {
        let result = transform_disambiguation_matches(vec![
            matched("refund"),
            head(&["refund", "replace"]),
            matched("replace"),
            matched("greet"),
        ]);

        assert_eq!(result.len(), 2);
        let clarification = &result[0];
        assert!(clarification.guideline_id().is_transient());
        assert_eq!(clarification.score, MAX_SCORE);
        assert_eq!(
            clarification.guideline.content.action.as_deref(),
            Some("ask whether they want a refund or a replacement")
        );
        assert_eq!(
            clarification.guideline.content.condition,
            "the customer received the wrong item"
        );
        assert!(clarification.guideline.tags.is_empty());
        assert_eq!(result[1].guideline_id().as_str(), "greet");
    }

    #[test]
    fn test_without_disambiguation_matches_pass_through() {
        let input = vec![matched("a"), matched("b")];
        assert_eq!(transform_disambiguation_matches(input.clone()), input);
    }

    #[test]
    fn test_transform_is_idempotent() {
        let once = transform_disambiguation_matches(vec![head(&["refund"]), matched("refund")]);
        let twice = transform_disambiguation_matches(once.clone());
        assert_eq!(once, twice);
    }
}
