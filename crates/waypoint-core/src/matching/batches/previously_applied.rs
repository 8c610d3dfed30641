//! Previously-applied batch: should an already-applied action be applied again?

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
pub struct PreviouslyAppliedCheck {
    pub guideline_id: String,
    pub condition: String,
    #[serde(default)]
    pub action: String,
    pub guideline_should_reapply_rationale: String,
    pub guideline_should_reapply: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviouslyAppliedMatchesSchema {
    #[serde(default)]
    pub checks: Vec<PreviouslyAppliedCheck>,
}

impl Schema for PreviouslyAppliedMatchesSchema {
    const NAME: &'static str = "PreviouslyAppliedMatchesSchema";
}

const TASK: &str = r#"TASK DESCRIPTION
-----------------
Each guideline below has already had its action applied at some point in this conversation. Decide whether the action should be applied AGAIN in the next reply.
Reapply only if the condition has become true again in the MOST RECENT customer message. Relevance left over from earlier turns does not count: if the customer raised something, the agent acted on it, and the customer's latest message merely continues that exchange (for example by providing requested details), do not reapply.
Conditions that can be satisfied many times (for example "the customer asks a question") should be reapplied each time they are newly satisfied. One-time behaviors (for example "send the customer our address") are reapplied only if the condition stopped being true and is now clearly true again.
Be careful with conditions that sound ongoing (for example "the customer has a technical issue"): reapply only if the earlier issue was resolved and a new one has emerged."#;

const SHOTS: &[&str] = &[
    r#"Conversation:
[0] customer: I can't log in, I think I need to reset my password.
[1] agent: I can help with that. What's the email address on your account?
[2] customer: it's dana@example.com

Guidelines:
- guideline_id: g1
  condition: the customer wants to reset their password
  action: ask for the email address on the account

Expected result:
{"checks": [
  {"guideline_id": "g1", "condition": "the customer wants to reset their password", "action": "ask for the email address on the account", "guideline_should_reapply_rationale": "The agent already asked for the email and the latest message provides it; no new reset request was made", "guideline_should_reapply": false}
]}"#,
    r#"Conversation:
[0] customer: I can't log in, I think I need to reset my password.
[1] agent: Done, a reset link was sent to dana@example.com.
[2] customer: Thanks! Oh, and I also need to reset the password for my work account.

Guidelines:
- guideline_id: g1
  condition: the customer wants to reset their password
  action: ask for the email address on the account

Expected result:
{"checks": [
  {"guideline_id": "g1", "condition": "the customer wants to reset their password", "action": "ask for the email address on the account", "guideline_should_reapply_rationale": "The latest message raises a new reset request for a different account", "guideline_should_reapply": true}
]}"#,
];

/// Batch of previously applied, non customer-dependent guidelines
pub struct PreviouslyAppliedBatch {
    generator: Arc<dyn SchematicGenerator<PreviouslyAppliedMatchesSchema>>,
    guidelines: GuidelineIndex,
    context: BatchContext,
    temperatures: TemperatureLadder,
}

impl PreviouslyAppliedBatch {
    pub fn new(
        generator: Arc<dyn SchematicGenerator<PreviouslyAppliedMatchesSchema>>,
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
            .add_section(SectionName::Custom("previously-applied-task".into()), TASK, NO_PROPS)
            .add_exemplars(SHOTS);
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
                    "guideline_should_reapply_rationale": "<str, why the action should or should not be applied again>",
                    "guideline_should_reapply": "<bool>",
                })
            })
            .collect();
        add_output_format(&mut builder, Some(self.guidelines.len()), &json!({ "checks": checks }))?;

        Ok(builder.build())
    }
}

#[async_trait]
impl GuidelineMatchingBatch for PreviouslyAppliedBatch {
    fn name(&self) -> &str {
        "previously_applied"
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

        let mut matches = Vec::new();
        for check in &result.content.checks {
            if !check.guideline_should_reapply {
                debug!(guideline_id = %check.guideline_id, "Skipped: no reapplication");
                continue;
            }
            let Some(guideline) = self.guidelines.resolve(self.name(), &check.guideline_id) else {
                continue;
            };

            matches.push(
                GuidelineMatch::new(
                    guideline.clone(),
                    MAX_SCORE,
                    format!("reapply rationale: \"{}\"", check.guideline_should_reapply_rationale),
                )
                .with_annotations(MatchAnnotations {
                    previously_applied: PreviouslyApplied::Fully,
                    is_continuous: true,
                    should_reapply: true,
                    ..Default::default()
                }),
            );
        }

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
