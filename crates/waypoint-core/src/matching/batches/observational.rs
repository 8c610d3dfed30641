//! Observational batch: does each condition currently hold?

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    GUIDELINE_PRIMER, NO_PROPS, add_guidelines_section, add_output_format, format_guidelines,
    generate,
};
use crate::error::Result;
use crate::guidelines::{Guideline, GuidelineMatch, MAX_SCORE, MatchAnnotations, PreviouslyApplied};
use crate::matching::batch::{GuidelineIndex, GuidelineMatchingBatch, GuidelineMatchingBatchResult};
use crate::matching::context::BatchContext;
use crate::matching::policy::TemperatureLadder;
use crate::nlp::{Schema, SchematicGenerator};
use crate::prompt::{PromptBuilder, SectionName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationalCheck {
    pub guideline_id: String,
    pub condition: String,
    pub rationale: String,
    pub applies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationalMatchesSchema {
    #[serde(default)]
    pub checks: Vec<ObservationalCheck>,
}

impl Schema for ObservationalMatchesSchema {
    const NAME: &'static str = "ObservationalMatchesSchema";
}

const TASK: &str = r#"TASK DESCRIPTION
-----------------
Each guideline below only has a condition. For every one of them, decide whether the condition currently holds in the conversation.
A condition holds if it is true of the conversation as it stands now. Conditions about something the customer said earlier still hold unless the conversation has clearly moved past them.
Explain your reasoning briefly in "rationale" before answering "applies"."#;

const SHOTS: &[&str] = &[
    r#"Conversation:
[0] customer: Hi, I'm thinking of switching to your plan from CompetitorCo.
[1] agent: Great to hear! What made you consider switching?
[2] customer: Mostly the price, honestly.

Guidelines:
- guideline_id: g1
  condition: the customer mentions a competitor
- guideline_id: g2
  condition: the customer reports a technical problem

Expected result:
{"checks": [
  {"guideline_id": "g1", "condition": "the customer mentions a competitor", "rationale": "The customer named CompetitorCo while discussing the switch, which is still the topic", "applies": true},
  {"guideline_id": "g2", "condition": "the customer reports a technical problem", "rationale": "No problem was reported; the customer is discussing pricing", "applies": false}
]}"#,
];

/// Batch of observational guidelines
pub struct ObservationalBatch {
    generator: Arc<dyn SchematicGenerator<ObservationalMatchesSchema>>,
    guidelines: GuidelineIndex,
    context: BatchContext,
    temperatures: TemperatureLadder,
}

impl ObservationalBatch {
    pub fn new(
        generator: Arc<dyn SchematicGenerator<ObservationalMatchesSchema>>,
        guidelines: Vec<Guideline>,
        context: BatchContext,
        temperatures: TemperatureLadder,
    ) -> Self {
        Self {
            generator,
            guidelines: GuidelineIndex::new(guidelines),
            context,
            temperatures,
        }
    }

    fn build_prompt(&self) -> Result<String> {
        let mut builder = PromptBuilder::new();
        builder
            .add_section(SectionName::GeneralInstructions, GUIDELINE_PRIMER, NO_PROPS)
            .add_section(SectionName::Custom("observational-task".into()), TASK, NO_PROPS)
            .add_exemplars(SHOTS);
        self.context.add_conversation_sections(&mut builder);
        add_guidelines_section(&mut builder, format_guidelines(self.guidelines.iter()));

        let checks: Vec<_> = self
            .guidelines
            .iter()
            .map(|g| {
                json!({
                    "guideline_id": g.id,
                    "condition": g.internal_representation().condition,
                    "rationale": "<str, why the condition does or does not hold now>",
                    "applies": "<bool>",
                })
            })
            .collect();
        add_output_format(&mut builder, Some(self.guidelines.len()), &json!({ "checks": checks }))?;

        Ok(builder.build())
    }
}

#[async_trait]
impl GuidelineMatchingBatch for ObservationalBatch {
    fn name(&self) -> &str {
        "observational"
    }

    fn size(&self) -> usize {
        self.guidelines.len()
    }

    async fn process(&self) -> Result<GuidelineMatchingBatchResult> {
        let prompt = self.build_prompt()?;
        let result = generate(
            self.generator.as_ref(),
            self.name(),
            &prompt,
            self.temperatures.next(),
        )
        .await?;

        if result.content.checks.is_empty() {
            warn!(batch = %self.name(), guidelines = self.size(), "No checks generated");
        }

        let matches: Vec<GuidelineMatch> = result
            .content
            .checks
            .iter()
            .filter(|check| check.applies)
            .filter_map(|check| {
                let guideline = self.guidelines.resolve(self.name(), &check.guideline_id)?;
                Some(
                    GuidelineMatch::new(guideline.clone(), MAX_SCORE, check.rationale.clone())
                        .with_annotations(MatchAnnotations {
                            previously_applied: PreviouslyApplied::Irrelevant,
                            ..Default::default()
                        }),
                )
            })
            .collect();

        debug!(
            batch = %self.name(),
            evaluated = result.content.checks.len(),
            matched = matches.len(),
            "Batch processed"
        );

        Ok(GuidelineMatchingBatchResult {
            matches,
            generation_info: result.info,
        })
    }
}
