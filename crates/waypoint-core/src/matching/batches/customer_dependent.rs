//! Customer-dependent batch for previously applied guidelines whose action
//! is split between the agent and the customer

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
pub struct CustomerDependentCheck {
    pub guideline_id: String,
    pub condition: String,
    #[serde(default)]
    pub action: String,
    pub condition_still_met: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_should_reply: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_met_again: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_wasnt_taken: Option<bool>,
    pub tldr: String,
    pub should_apply: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDependentMatchesSchema {
    #[serde(default)]
    pub checks: Vec<CustomerDependentCheck>,
}

impl Schema for CustomerDependentMatchesSchema {
    const NAME: &'static str = "CustomerDependentMatchesSchema";
}

const TASK: &str = r#"TASK DESCRIPTION
-----------------
Each guideline below is customer dependent: its action is only complete once both the agent and the customer have done their part. The agent has already performed its part at least once.
A guideline should apply again if either:
1. The condition still holds, the reason that triggered the agent's part is still relevant, and the customer has not yet fulfilled their side.
   Example: the agent asked for the customer's ID, the customer has not answered, and the conversation is still about accessing their account.
2. The condition arises again in a new context and the whole exchange should be repeated.
   Example: the customer switches to a second account and the agent needs another ID.
Do not repeat actions whose result cannot change, such as asking again for a name that was already given.
Only the latest customer message can make the condition true again; earlier relevance that has been superseded does not count."#;

const SHOTS: &[&str] = &[
    r#"Conversation:
[0] customer: I'd like to check my order status.
[1] agent: Sure, what's your order number?
[2] customer: Hold on, does the order number start with a letter?

Guidelines:
- guideline_id: g1
  condition: the customer asks about an order
  action: ask the customer for their order number

Expected result:
{"checks": [
  {"guideline_id": "g1", "condition": "the customer asks about an order", "action": "ask the customer for their order number", "condition_still_met": true, "customer_should_reply": true, "tldr": "The agent asked for the order number and the customer has not provided it yet", "should_apply": true}
]}"#,
];

/// Batch of previously applied customer-dependent guidelines
pub struct CustomerDependentBatch {
    generator: Arc<dyn SchematicGenerator<CustomerDependentMatchesSchema>>,
    guidelines: GuidelineIndex,
    context: BatchContext,
    temperatures: TemperatureLadder,
}

impl CustomerDependentBatch {
    pub fn new(
        generator: Arc<dyn SchematicGenerator<CustomerDependentMatchesSchema>>,
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

    fn describe(guideline: &Guideline) -> String {
        let base = format_guidelines([guideline]);
        match &guideline.annotations.customer_dependent_action {
            Some(split) => format!(
                "{}\n  agent part: {}\n  customer part: {}",
                base,
                split.agent_action.as_deref().unwrap_or("-"),
                split.customer_action.as_deref().unwrap_or("-"),
            ),
            None => base,
        }
    }

    fn build_prompt(&self) -> Result<String> {
        let mut builder = PromptBuilder::new();
        builder
            .add_section(SectionName::GeneralInstructions, GUIDELINE_PRIMER, NO_PROPS)
            .add_section(SectionName::Custom("customer-dependent-task".into()), TASK, NO_PROPS)
            .add_exemplars(SHOTS);
        self.context.add_conversation_sections(&mut builder);

        let listed = self
            .guidelines
            .iter()
            .map(Self::describe)
            .collect::<Vec<_>>()
            .join("\n");
        add_guidelines_section(&mut builder, listed);

        let checks: Vec<_> = self
            .guidelines
            .iter()
            .map(|g| {
                let repr = g.internal_representation();
                json!({
                    "guideline_id": g.id,
                    "condition": repr.condition,
                    "action": repr.action,
                    "condition_still_met": "<bool, whether the condition still holds>",
                    "customer_should_reply": "<bool, whether the customer still owes their part; omit if the condition is no longer met>",
                    "condition_met_again": "<bool, whether the condition arose again in a new context; omit if not relevant>",
                    "action_wasnt_taken": "<bool, whether the new context was not yet acted on; omit if not relevant>",
                    "tldr": "<str, short explanation>",
                    "should_apply": "<bool>",
                })
            })
            .collect();
        add_output_format(&mut builder, Some(self.guidelines.len()), &json!({ "checks": checks }))?;

        Ok(builder.build())
    }
}

#[async_trait]
impl GuidelineMatchingBatch for CustomerDependentBatch {
    fn name(&self) -> &str {
        "previously_applied_customer_dependent"
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
            .filter(|check| check.should_apply)
            .filter_map(|check| {
                let guideline = self.guidelines.resolve(self.name(), &check.guideline_id)?;
                Some(
                    GuidelineMatch::new(
                        guideline.clone(),
                        MAX_SCORE,
                        format!("reapply rationale: \"{}\"", check.tldr),
                    )
                    .with_annotations(MatchAnnotations {
                        previously_applied: PreviouslyApplied::Fully,
                        should_reapply: true,
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
