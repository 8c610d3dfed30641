//! Actionable batch: first-time applicability, also used for continuous guidelines

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
pub struct ActionableCheck {
    pub guideline_id: String,
    pub condition: String,
    #[serde(default)]
    pub action: String,
    pub rationale: String,
    pub applies: bool,
    /// The action keeps applying for as long as the condition holds
    #[serde(default)]
    pub action_is_continuous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionableMatchesSchema {
    #[serde(default)]
    pub checks: Vec<ActionableCheck>,
}

impl Schema for ActionableMatchesSchema {
    const NAME: &'static str = "ActionableMatchesSchema";
}

const TASK: &str = r#"TASK DESCRIPTION
-----------------
For each guideline below, decide whether its condition applies to the latest state of the conversation, so that the agent should follow its action in the next reply.
Focus on the most recent customer message and on what the agent has already done. A guideline whose condition was only true earlier, and whose need has since been addressed, does not apply.
Also note in "action_is_continuous" whether the action is something the agent must keep doing for as long as the condition holds (for example "speak formally") rather than a one-time act (for example "send the address")."#;

const CONTINUOUS_NOTE: &str = "All guidelines in this list are continuous: evaluate them against the current turn regardless of whether their action was applied before.";

const SHOTS: &[&str] = &[
    r#"Conversation:
[0] customer: What are your opening hours on Sunday?
[1] agent: We're open from 10am to 4pm on Sundays.
[2] customer: Thanks. Also, do you deliver to Haifa?

Guidelines:
- guideline_id: g1
  condition: the customer asks about opening hours
  action: share the opening hours for the requested day
- guideline_id: g2
  condition: the customer asks about delivery
  action: check whether the address is in a supported region

Expected result:
{"checks": [
  {"guideline_id": "g1", "condition": "the customer asks about opening hours", "action": "share the opening hours for the requested day", "rationale": "The hours question was already answered and the latest message is about delivery", "applies": false, "action_is_continuous": false},
  {"guideline_id": "g2", "condition": "the customer asks about delivery", "action": "check whether the address is in a supported region", "rationale": "The latest message asks whether delivery to Haifa is possible", "applies": true, "action_is_continuous": false}
]}"#,
];

/// Batch of actionable guidelines evaluated for first application
///
/// Built with [`ActionableBatch::continuous`] for the continuous bucket,
/// whose matches are always flagged for reapplication.
pub struct ActionableBatch {
    generator: Arc<dyn SchematicGenerator<ActionableMatchesSchema>>,
    guidelines: GuidelineIndex,
    context: BatchContext,
    temperatures: TemperatureLadder,
    continuous: bool,
}

impl ActionableBatch {
    pub fn new(
        generator: Arc<dyn SchematicGenerator<ActionableMatchesSchema>>,
        guidelines: Vec<Guideline>,
        context: BatchContext,
        temperatures: TemperatureLadder,
    ) -> Self {
        Self {
            generator,
            guidelines: GuidelineIndex::new(guidelines),
            context,
            temperatures,
            continuous: false,
        }
    }

    pub fn continuous(
        generator: Arc<dyn SchematicGenerator<ActionableMatchesSchema>>,
        guidelines: Vec<Guideline>,
        context: BatchContext,
        temperatures: TemperatureLadder,
    ) -> Self {
        Self {
            continuous: true,
            ..Self::new(generator, guidelines, context, temperatures)
        }
    }

    fn build_prompt(&self) -> Result<String> {
        let mut builder = PromptBuilder::new();
        builder
            .add_section(SectionName::GeneralInstructions, GUIDELINE_PRIMER, NO_PROPS)
            .add_section(SectionName::Custom("actionable-task".into()), TASK, NO_PROPS);
        if self.continuous {
            builder.add_section(
                SectionName::Custom("continuous-note".into()),
                CONTINUOUS_NOTE,
                NO_PROPS,
            );
        }
        builder.add_exemplars(SHOTS);
        self.context.add_conversation_sections(&mut builder);
        add_guidelines_section(&mut builder, format_guidelines(self.guidelines.iter()));

        let checks: Vec<_> = self
            .guidelines
            .iter()
            .map(|g| {
                let repr = g.internal_representation();
                json!({
                    "guideline_id": g.id,
                    "condition": repr.condition,
                    "action": repr.action,
                    "rationale": "<str, why the guideline does or does not apply now>",
                    "applies": "<bool>",
                    "action_is_continuous": "<bool>",
                })
            })
            .collect();
        add_output_format(&mut builder, Some(self.guidelines.len()), &json!({ "checks": checks }))?;

        Ok(builder.build())
    }

    fn to_match(&self, guideline: &Guideline, check: &ActionableCheck) -> GuidelineMatch {
        let previously_applied = if self
            .context
            .strategy
            .session
            .agent_state
            .applied_guideline_ids
            .contains(&guideline.id)
        {
            PreviouslyApplied::Fully
        } else {
            PreviouslyApplied::No
        };

        GuidelineMatch::new(guideline.clone(), MAX_SCORE, check.rationale.clone()).with_annotations(
            MatchAnnotations {
                previously_applied,
                is_continuous: self.continuous || check.action_is_continuous,
                should_reapply: self.continuous,
                ..Default::default()
            },
        )
    }
}

#[async_trait]
impl GuidelineMatchingBatch for ActionableBatch {
    fn name(&self) -> &str {
        if self.continuous {
            "continuous"
        } else {
            "actionable"
        }
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
                self.guidelines
                    .resolve(self.name(), &check.guideline_id)
                    .map(|guideline| self.to_match(guideline, check))
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
