//! Waypoint Core Integration Tests
//!
//! Runs whole matching cycles against scripted oracles.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use waypoint_core::entities::{Agent, Customer};
use waypoint_core::entity_queries::{EntityQueries, JourneyCacheSettings};
use waypoint_core::guidelines::{
    Guideline, GuidelineMatch, InMemoryGuidelineStore, JourneyStepLink, MAX_SCORE,
    PreviouslyApplied,
};
use waypoint_core::ids::GuidelineId;
use waypoint_core::journeys::{InMemoryJourneyStore, Journey};
use waypoint_core::matching::batches::{
    ActionableMatchesSchema, CustomerDependentMatchesSchema, DisambiguationMatchesSchema,
    JourneyStepSelectionSchema, ObservationalMatchesSchema, PreviouslyAppliedMatchesSchema,
    ResponseAnalysisSchema,
};
use waypoint_core::matching::{
    GenericGuidelineMatchingStrategy, GenericStrategyResolver, GuidelineMatcher,
    GuidelineMatchingBatch, GuidelineMatchingBatchResult, GuidelineMatchingStrategy,
    JourneyStepSelectionStrategy, MatchingGenerators, ReportAnalysisContext, ResponseAnalysisBatch,
    RetryPolicy, StrategyContext, StrategyKind,
};
use waypoint_core::nlp::{
    GenerationHints, GenerationInfo, Schema, SchematicGenerationResult, SchematicGenerator,
};
use waypoint_core::relational::RelationalGuidelineResolver;
use waypoint_core::relationships::{
    InMemoryRelationshipStore, RelationshipEntity, RelationshipKind, RelationshipStore,
};
use waypoint_core::sessions::Session;
use waypoint_core::{Error, Result};

// ========== Scripted oracle ==========

type Script<T> = Box<dyn Fn(&str) -> T + Send + Sync>;

/// Oracle answering from a script, optionally failing its first calls
struct Scripted<T> {
    script: Script<T>,
    calls: AtomicUsize,
    failures: usize,
}

impl<T> Scripted<T> {
    fn new(script: impl Fn(&str) -> T + Send + Sync + 'static) -> Arc<Self> {
        Self::failing(0, script)
    }

    fn failing(failures: usize, script: impl Fn(&str) -> T + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            failures,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Schema> SchematicGenerator<T> for Scripted<T> {
    async fn generate(
        &self,
        prompt: &str,
        _hints: &GenerationHints,
    ) -> Result<SchematicGenerationResult<T>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::OracleUnavailable("scripted outage".to_string()));
        }
        Ok(SchematicGenerationResult {
            content: (self.script)(prompt),
            info: GenerationInfo::new(T::NAME, "scripted"),
        })
    }
}

/// Ids listed in the guidelines section of a prompt
fn listed_ids(prompt: &str) -> Vec<String> {
    let section = prompt
        .rfind("GUIDELINES\n-----------------")
        .map(|start| &prompt[start..])
        .unwrap_or(prompt);
    section
        .lines()
        .filter_map(|line| line.strip_prefix("- guideline_id: "))
        .map(str::to_string)
        .collect()
}

fn all_apply() -> Arc<Scripted<ActionableMatchesSchema>> {
    Scripted::new(|prompt| {
        serde_json::from_value(json!({
            "checks": listed_ids(prompt).into_iter().map(|id| json!({
                "guideline_id": id,
                "condition": "",
                "rationale": "the condition holds",
                "applies": true,
            })).collect::<Vec<_>>()
        }))
        .unwrap()
    })
}

fn all_observed() -> Arc<Scripted<ObservationalMatchesSchema>> {
    Scripted::new(|prompt| {
        serde_json::from_value(json!({
            "checks": listed_ids(prompt).into_iter().map(|id| json!({
                "guideline_id": id,
                "condition": "",
                "rationale": "observed",
                "applies": true,
            })).collect::<Vec<_>>()
        }))
        .unwrap()
    })
}

fn unused<T: Schema>() -> Arc<Scripted<T>> {
    Scripted::new(|_| panic!("oracle should not be called"))
}

// ========== Fixture ==========

struct Fixture {
    guidelines: Arc<InMemoryGuidelineStore>,
    journeys: Arc<InMemoryJourneyStore>,
    relationships: Arc<InMemoryRelationshipStore>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            guidelines: Arc::new(InMemoryGuidelineStore::new()),
            journeys: Arc::new(InMemoryJourneyStore::new()),
            relationships: Arc::new(InMemoryRelationshipStore::new()),
        }
    }

    fn generic(&self, generators: MatchingGenerators) -> Arc<GenericGuidelineMatchingStrategy> {
        let queries = Arc::new(EntityQueries::new(
            self.journeys.clone(),
            self.guidelines.clone(),
            self.relationships.clone(),
            JourneyCacheSettings::default(),
        ));
        Arc::new(GenericGuidelineMatchingStrategy::new(
            generators,
            self.relationships.clone(),
            queries,
        ))
    }

    fn matcher(&self, generators: MatchingGenerators, retry: RetryPolicy) -> GuidelineMatcher {
        let resolver = GenericStrategyResolver::new(self.generic(generators));
        GuidelineMatcher::new(Arc::new(resolver), retry)
    }
}

struct Generators {
    observational: Arc<Scripted<ObservationalMatchesSchema>>,
    actionable: Arc<Scripted<ActionableMatchesSchema>>,
    previously_applied: Arc<Scripted<PreviouslyAppliedMatchesSchema>>,
    customer_dependent: Arc<Scripted<CustomerDependentMatchesSchema>>,
    disambiguation: Arc<Scripted<DisambiguationMatchesSchema>>,
    response_analysis: Arc<Scripted<ResponseAnalysisSchema>>,
}

impl Default for Generators {
    fn default() -> Self {
        Self {
            observational: all_observed(),
            actionable: all_apply(),
            previously_applied: unused(),
            customer_dependent: unused(),
            disambiguation: unused(),
            response_analysis: unused(),
        }
    }
}

impl Generators {
    fn build(&self) -> MatchingGenerators {
        MatchingGenerators {
            observational: self.observational.clone(),
            actionable: self.actionable.clone(),
            previously_applied: self.previously_applied.clone(),
            customer_dependent: self.customer_dependent.clone(),
            disambiguation: self.disambiguation.clone(),
            response_analysis: self.response_analysis.clone(),
        }
    }
}

fn context(session: Session) -> Arc<StrategyContext> {
    Arc::new(StrategyContext::new(Agent::new("Sage"), session, Customer::guest()))
}

fn session() -> Session {
    Session::new("agent".into(), "customer".into())
}

fn actionable(id: &str) -> Guideline {
    Guideline::actionable(format!("the customer asks about {}", id), format!("answer about {}", id))
        .with_id(id)
}

fn ids(matches: &[GuidelineMatch]) -> Vec<&str> {
    matches.iter().map(|m| m.guideline_id().as_str()).collect()
}

// ========== Matching cycle ==========

#[tokio::test]
async fn test_empty_input_makes_no_oracle_calls() {
    let fixture = Fixture::new();
    let generators = Generators {
        observational: unused(),
        actionable: unused(),
        ..Default::default()
    };
    let matcher = fixture.matcher(generators.build(), RetryPolicy::default());

    let result = matcher.match_guidelines(context(session()), &[]).await.unwrap();

    assert_eq!(result.batch_count, 0);
    assert!(result.matches.is_empty());
}

#[tokio::test]
async fn test_buckets_are_partitioned_into_batches() {
    let fixture = Fixture::new();
    let generators = Generators::default();
    let matcher = fixture.matcher(generators.build(), RetryPolicy::default());

    let mut guidelines: Vec<Guideline> = (0..25).map(|i| actionable(&format!("topic-{}", i))).collect();
    for i in 0..3 {
        guidelines.push(
            Guideline::observational(format!("the customer mentions brand {}", i))
                .with_id(format!("brand-{}", i)),
        );
    }

    let result = matcher
        .match_guidelines(context(session()), &guidelines)
        .await
        .unwrap();

    // 25 actionable guidelines fall in the three-batch band
    assert_eq!(generators.actionable.calls(), 3);
    assert_eq!(generators.observational.calls(), 1);
    assert_eq!(result.batch_count, 4);

    let sizes: Vec<usize> = result.batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 9, 8, 8]);
    assert_eq!(result.matches.len(), 28);
    assert!(result.matches.iter().all(|m| m.score == MAX_SCORE));
}

#[tokio::test]
async fn test_applied_guideline_is_checked_for_reapplication() {
    let fixture = Fixture::new();
    let generators = Generators {
        actionable: Scripted::new(|_| panic!("applied guidelines skip the actionable batch")),
        previously_applied: Scripted::new(|prompt| {
            serde_json::from_value(json!({
                "checks": listed_ids(prompt).into_iter().map(|id| json!({
                    "guideline_id": id,
                    "condition": "",
                    "guideline_should_reapply_rationale": "asked again",
                    "guideline_should_reapply": true,
                })).collect::<Vec<_>>()
            }))
            .unwrap()
        }),
        ..Default::default()
    };
    let matcher = fixture.matcher(generators.build(), RetryPolicy::default());

    let session = session().with_applied([GuidelineId::from("pricing")]);
    let result = matcher
        .match_guidelines(context(session), &[actionable("pricing")])
        .await
        .unwrap();

    assert_eq!(generators.previously_applied.calls(), 1);
    assert_eq!(ids(&result.matches), vec!["pricing"]);
    let annotations = &result.matches[0].annotations;
    assert!(annotations.should_reapply);
    assert_eq!(annotations.previously_applied, PreviouslyApplied::Fully);
}

#[tokio::test]
async fn test_ambiguous_request_becomes_clarification() {
    let fixture = Fixture::new();
    for target in ["change-address", "change-items"] {
        fixture
            .relationships
            .create_relationship(
                RelationshipEntity::Guideline("change-order".into()),
                RelationshipEntity::Guideline(target.into()),
                RelationshipKind::Disambiguation,
            )
            .await
            .unwrap();
    }

    let generators = Generators {
        observational: Scripted::new(|_| panic!("the head is evaluated by disambiguation")),
        disambiguation: Scripted::new(|_| {
            serde_json::from_value(json!({
                "tldr": "the customer did not say what to change",
                "is_ambiguous": true,
                "guidelines": [
                    {"guideline_id": "1", "tldr": "could be the address", "requires_disambiguation": true},
                    {"guideline_id": "2", "tldr": "could be the items", "requires_disambiguation": true},
                ],
                "clarification_action": "Ask whether they want to change the delivery address or the items",
            }))
            .unwrap()
        }),
        ..Default::default()
    };
    let matcher = fixture.matcher(generators.build(), RetryPolicy::default());

    let guidelines = vec![
        Guideline::observational("the customer wants to change their order").with_id("change-order"),
        actionable("change-address"),
        actionable("change-items"),
        actionable("shipping"),
    ];
    let result = matcher
        .match_guidelines(context(session()), &guidelines)
        .await
        .unwrap();

    assert_eq!(generators.disambiguation.calls(), 1);
    assert_eq!(result.matches.len(), 2);

    let clarification = &result.matches[0];
    assert!(clarification.guideline_id().is_transient());
    assert_eq!(clarification.score, MAX_SCORE);
    assert_eq!(
        clarification.guideline.content.action.as_deref(),
        Some("Ask whether they want to change the delivery address or the items")
    );
    assert_eq!(
        clarification.guideline.content.condition,
        "the customer wants to change their order"
    );
    assert_eq!(result.matches[1].guideline_id().as_str(), "shipping");
}

#[tokio::test]
async fn test_journey_steps_routed_by_tag_override() {
    let fixture = Fixture::new();
    let journey = Journey::new("Book a table")
        .with_id("booking")
        .with_steps(vec!["ask-date".into(), "ask-size".into(), "confirm".into()]);
    fixture.journeys.upsert(journey.clone()).await;

    let step = |id: &str, follow_ups: &[&str]| {
        Guideline::actionable(format!("reached {}", id), format!("do {}", id))
            .with_id(id)
            .with_tags(vec![journey.tag()])
            .with_journey_step(
                JourneyStepLink::new(journey.id.clone())
                    .with_follow_ups(follow_ups.iter().map(|f| GuidelineId::from(*f)).collect()),
            )
    };
    let steps = vec![
        step("ask-date", &["ask-size"]),
        step("ask-size", &["confirm"]),
        step("confirm", &[]),
    ];
    for guideline in &steps {
        fixture.guidelines.upsert(guideline.clone()).await.unwrap();
    }

    let selection: Arc<Scripted<JourneyStepSelectionSchema>> = Scripted::new(|_| {
        serde_json::from_value(json!({
            "last_customer_message": "actually, make it Friday instead",
            "journey_applies": true,
            "last_current_step": "3",
            "rationale": "the customer wants to change the date",
            "requires_backtracking": true,
            "backtracking_target_step": "1",
            "last_current_step_completed": true,
            "step_advance": ["1"],
            "next_step": "1",
        }))
        .unwrap()
    });
    let journey_strategy = Arc::new(JourneyStepSelectionStrategy::new(
        selection.clone(),
        fixture.journeys.clone(),
        fixture.guidelines.clone(),
    ));

    let generators = Generators::default();
    let resolver = GenericStrategyResolver::new(fixture.generic(generators.build()))
        .with_tag_override(journey.tag(), journey_strategy);
    let matcher = GuidelineMatcher::new(Arc::new(resolver), RetryPolicy::default());

    let session = session().with_journey_path(
        journey.id.clone(),
        vec![Some("ask-date".into()), Some("ask-size".into()), Some("confirm".into())],
    );
    let mut guidelines = steps.clone();
    guidelines.push(actionable("opening-hours"));

    let result = matcher
        .match_guidelines(context(session), &guidelines)
        .await
        .unwrap();

    assert_eq!(selection.calls(), 1);
    assert_eq!(generators.actionable.calls(), 1);
    assert_eq!(result.batch_count, 2);

    let step_match = result
        .matches
        .iter()
        .find(|m| m.guideline_id().as_str() == "ask-date")
        .expect("backtracked step should match");
    assert_eq!(
        step_match.annotations.journey_path,
        Some(vec![Some(GuidelineId::from("ask-date"))])
    );
    assert!(step_match.annotations.requires_backtracking);
    assert!(result.matches.iter().any(|m| m.guideline_id().as_str() == "opening-hours"));
    assert!(!result.matches.iter().any(|m| m.guideline_id().as_str() == "confirm"));
}

// ========== Cross-strategy resolution ==========

/// Strategy matching every guideline it is given, in a single batch
struct MatchEverything {
    batches: AtomicUsize,
}

struct MatchEverythingBatch(Vec<Guideline>);

#[async_trait]
impl GuidelineMatchingBatch for MatchEverythingBatch {
    fn name(&self) -> &str {
        "match_everything"
    }

    fn size(&self) -> usize {
        self.0.len()
    }

    async fn process(&self) -> Result<GuidelineMatchingBatchResult> {
        Ok(GuidelineMatchingBatchResult {
            matches: self
                .0
                .iter()
                .map(|g| GuidelineMatch::new(g.clone(), 8, "always applies"))
                .collect(),
            generation_info: GenerationInfo::new("none", "rule"),
        })
    }
}

#[async_trait]
impl GuidelineMatchingStrategy for MatchEverything {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Custom("match_everything")
    }

    async fn create_matching_batches(
        &self,
        guidelines: &[Guideline],
        _context: Arc<StrategyContext>,
    ) -> Result<Vec<Box<dyn GuidelineMatchingBatch>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Box::new(MatchEverythingBatch(guidelines.to_vec()))])
    }

    async fn create_response_analysis_batches(
        &self,
        _matches: &[GuidelineMatch],
        _context: Arc<ReportAnalysisContext>,
    ) -> Result<Vec<Box<dyn ResponseAnalysisBatch>>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_clarification_supersedes_targets_of_another_strategy() {
    let fixture = Fixture::new();
    let targets = [actionable("change-address"), actionable("change-items")];
    for target in &targets {
        fixture.guidelines.upsert(target.clone()).await.unwrap();
        fixture
            .relationships
            .create_relationship(
                RelationshipEntity::Guideline("change-order".into()),
                RelationshipEntity::Guideline(target.id.clone()),
                RelationshipKind::Disambiguation,
            )
            .await
            .unwrap();
    }

    let generators = Generators {
        disambiguation: Scripted::new(|_| {
            serde_json::from_value(json!({
                "tldr": "the customer did not say what to change",
                "is_ambiguous": true,
                "guidelines": [
                    {"guideline_id": "1", "tldr": "could be the address", "requires_disambiguation": true},
                    {"guideline_id": "2", "tldr": "could be the items", "requires_disambiguation": true},
                ],
                "clarification_action": "Ask whether they want to change the delivery address or the items",
            }))
            .unwrap()
        }),
        ..Default::default()
    };
    let everything = Arc::new(MatchEverything {
        batches: AtomicUsize::new(0),
    });
    let resolver = GenericStrategyResolver::new(fixture.generic(generators.build()))
        .with_guideline_override("change-address", everything.clone())
        .with_guideline_override("change-items", everything.clone());
    let matcher = GuidelineMatcher::new(Arc::new(resolver), RetryPolicy::default());

    let mut guidelines = vec![
        Guideline::observational("the customer wants to change their order").with_id("change-order"),
        actionable("shipping"),
    ];
    guidelines.extend(targets);

    let result = matcher
        .match_guidelines(context(session()), &guidelines)
        .await
        .unwrap();

    // The targets were matched by the other strategy before the transform
    assert_eq!(everything.batches.load(Ordering::SeqCst), 1);
    assert_eq!(generators.disambiguation.calls(), 1);
    let raw: Vec<&str> = result.batches.iter().flatten().map(|m| m.guideline_id().as_str()).collect();
    assert!(raw.contains(&"change-address") && raw.contains(&"change-items"));

    assert_eq!(result.matches.len(), 2);
    assert!(result.matches[0].guideline_id().is_transient());
    assert!(result.matches[0].guideline.tags.is_empty());
    assert_eq!(result.matches[1].guideline_id().as_str(), "shipping");
}

// ========== Relational resolution ==========

#[tokio::test]
async fn test_priority_through_uncarried_tag_after_matching() {
    let fixture = Fixture::new();
    let edges = [
        (RelationshipEntity::Guideline("upsell".into()), RelationshipEntity::Tag("escalations".into())),
        (RelationshipEntity::Tag("escalations".into()), RelationshipEntity::Guideline("complaint".into())),
    ];
    for (source, target) in edges {
        fixture
            .relationships
            .create_relationship(source, target, RelationshipKind::Priority)
            .await
            .unwrap();
    }

    let generators = Generators::default();
    let matcher = fixture.matcher(generators.build(), RetryPolicy::default());
    let guidelines = vec![actionable("upsell"), actionable("complaint")];
    let result = matcher
        .match_guidelines(context(session()), &guidelines)
        .await
        .unwrap();
    assert_eq!(result.matches.len(), 2);

    let resolver = RelationalGuidelineResolver::new(fixture.relationships.clone());
    let resolved = resolver.resolve(&guidelines, result.matches).await.unwrap();

    assert_eq!(ids(&resolved), vec!["complaint"]);
}

// ========== Retries ==========

#[tokio::test]
async fn test_failing_batch_aborts_cycle() {
    let fixture = Fixture::new();
    let generators = Generators {
        actionable: Scripted::failing(usize::MAX, |_| unreachable!()),
        ..Default::default()
    };
    let matcher = fixture.matcher(
        generators.build(),
        RetryPolicy::new(2).with_jitter(false),
    );

    let guidelines = vec![
        Guideline::observational("the customer is upset").with_id("upset"),
        actionable("refunds"),
    ];
    let err = matcher
        .match_guidelines(context(session()), &guidelines)
        .await
        .unwrap_err();

    match err {
        Error::BatchFailed { attempts, source, .. } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, Error::OracleUnavailable(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(generators.actionable.calls(), 2);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let fixture = Fixture::new();
    let generators = Generators {
        actionable: Scripted::failing(1, |prompt| {
            serde_json::from_value(json!({
                "checks": listed_ids(prompt).into_iter().map(|id| json!({
                    "guideline_id": id,
                    "condition": "",
                    "rationale": "second try",
                    "applies": true,
                })).collect::<Vec<_>>()
            }))
            .unwrap()
        }),
        ..Default::default()
    };
    let matcher = fixture.matcher(
        generators.build(),
        RetryPolicy::new(3).with_jitter(false),
    );

    let result = matcher
        .match_guidelines(context(session()), &[actionable("refunds")])
        .await
        .unwrap();

    assert_eq!(generators.actionable.calls(), 2);
    assert_eq!(ids(&result.matches), vec!["refunds"]);
}

// ========== Response analysis ==========

#[tokio::test]
async fn test_response_analysis_marks_applied_guidelines() {
    let fixture = Fixture::new();
    let generators = Generators {
        response_analysis: Scripted::new(|_| {
            serde_json::from_value(json!({
                "checks": [
                    {
                        "guideline_id": "greeting",
                        "guideline_applied_rationale": "the agent greeted the customer",
                        "guideline_applied_degree": "fully",
                    },
                    {
                        "guideline_id": "upsell",
                        "guideline_applied_rationale": "mentioned the plan but not the price",
                        "guideline_applied_degree": "partially",
                        "is_missing_part_consequential": true,
                    },
                ]
            }))
            .unwrap()
        }),
        ..Default::default()
    };
    let matcher = fixture.matcher(generators.build(), RetryPolicy::default());

    let matches = vec![
        GuidelineMatch::new(actionable("greeting"), MAX_SCORE, "new conversation"),
        GuidelineMatch::new(actionable("upsell"), MAX_SCORE, "customer is on the free plan"),
    ];
    let ctx = Arc::new(ReportAnalysisContext::from(context(session()).as_ref()));
    let result = matcher.analyze_response(ctx, &matches).await.unwrap();

    assert_eq!(result.batch_count, 1);
    let analyzed = result.analyzed_guidelines();
    assert_eq!(analyzed.len(), 2);
    assert!(analyzed[0].is_previously_applied);
    assert!(!analyzed[1].is_previously_applied);
}

#[tokio::test]
async fn test_response_analysis_of_nothing_is_empty() {
    let fixture = Fixture::new();
    let generators = Generators::default();
    let matcher = fixture.matcher(generators.build(), RetryPolicy::default());

    let ctx = Arc::new(ReportAnalysisContext::from(context(session()).as_ref()));
    let result = matcher.analyze_response(ctx, &[]).await.unwrap();

    assert_eq!(result.batch_count, 0);
    assert!(result.analyzed_guidelines().is_empty());
}
