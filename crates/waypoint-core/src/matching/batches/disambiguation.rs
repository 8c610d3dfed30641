//! Disambiguation batch: should the agent ask which interpretation is meant?

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{GUIDELINE_PRIMER, NO_PROPS, add_output_format, generate};
use crate::error::Result;
use crate::guidelines::{
    DisambiguationOutcome, Guideline, GuidelineMatch, MAX_SCORE, MatchAnnotations,
    PreviouslyApplied,
};
use crate::ids::GuidelineId;
use crate::matching::batch::{GuidelineMatchingBatch, GuidelineMatchingBatchResult};
use crate::matching::context::BatchContext;
use crate::matching::policy::TemperatureLadder;
use crate::nlp::{Schema, SchematicGenerator};
use crate::prompt::{PromptBuilder, SectionName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisambiguationTargetCheck {
    /// Short id of the target as listed in the prompt
    pub guideline_id: String,
    pub tldr: String,
    pub requires_disambiguation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisambiguationMatchesSchema {
    pub tldr: String,
    #[serde(alias = "is_disambiguate")]
    pub is_ambiguous: bool,
    #[serde(default)]
    pub guidelines: Vec<DisambiguationTargetCheck>,
    #[serde(default)]
    pub clarification_action: Option<String>,
}

impl Schema for DisambiguationMatchesSchema {
    const NAME: &'static str = "DisambiguationMatchesSchema";
}

const TASK: &str = r#"TASK DESCRIPTION
-----------------
Sometimes a customer's request can be understood in more than one way, and each interpretation calls for a different action. You are given a condition describing such an ambiguity, and a numbered list of guidelines, each describing one possible interpretation.
Decide whether the customer's latest message is ambiguous in this sense, so that the agent must ask the customer which option they mean before acting.
- If it is ambiguous, mark every guideline that might plausibly be what the customer wants with "requires_disambiguation": true. When in doubt, include the guideline: the customer should be offered every reasonable choice.
- A guideline may be ruled out when the conversation makes it clearly irrelevant.
- Then write a "clarification_action": an instruction for the agent to ask the customer which of the remaining options they want, naming each of them.
- If the agent already asked for clarification and the customer has not yet answered, the ambiguity is not new: answer false unless a genuinely different ambiguity has arisen."#;

const SHOTS: &[&str] = &[
    r#"Conversation:
[0] customer: Hi, I received the wrong item in my order.

Ambiguity condition: the customer received the wrong item

Guidelines:
1) condition: the customer wants a refund. action: issue a refund for the item
2) condition: the customer wants a replacement. action: ship the correct item

Expected result:
{"tldr": "The customer reports a wrong item without saying what they want", "is_ambiguous": true, "guidelines": [
  {"guideline_id": "1", "tldr": "A refund is a plausible resolution", "requires_disambiguation": true},
  {"guideline_id": "2", "tldr": "A replacement is a plausible resolution", "requires_disambiguation": true}
], "clarification_action": "Ask the customer whether they would like a refund or a replacement for the wrong item"}"#,
    r#"Conversation:
[0] customer: I received the wrong item, please just send me the one I ordered.

Ambiguity condition: the customer received the wrong item

Guidelines:
1) condition: the customer wants a refund. action: issue a refund for the item
2) condition: the customer wants a replacement. action: ship the correct item

Expected result:
{"tldr": "The customer explicitly asks for a replacement", "is_ambiguous": false}"#,
];

/// Batch over one disambiguation group
pub struct DisambiguationBatch {
    generator: Arc<dyn SchematicGenerator<DisambiguationMatchesSchema>>,
    head: Guideline,
    targets: Vec<Guideline>,
    short_ids: HashMap<String, GuidelineId>,
    context: BatchContext,
    temperatures: TemperatureLadder,
}

impl DisambiguationBatch {
    /// # Panics
    ///
    /// If fewer than two targets are given; such a group is misconfigured.
    pub fn new(
        generator: Arc<dyn SchematicGenerator<DisambiguationMatchesSchema>>,
        head: Guideline,
        targets: Vec<Guideline>,
        context: BatchContext,
        temperatures: TemperatureLadder,
    ) -> Self {
        assert!(
            targets.len() >= 2,
            "disambiguation group '{}' needs at least two targets, got {}",
            head.id,
            targets.len()
        );

        let short_ids = targets
            .iter()
            .enumerate()
            .map(|(i, g)| ((i + 1).to_string(), g.id.clone()))
            .collect();

        Self {
            generator,
            head,
            targets,
            short_ids,
            context,
            temperatures,
        }
    }

    pub fn head(&self) -> &Guideline {
        &self.head
    }

    fn build_prompt(&self) -> Result<String> {
        let listed = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let repr = g.internal_representation();
                format!(
                    "{}) condition: {}. action: {}",
                    i + 1,
                    repr.condition,
                    repr.action.as_deref().unwrap_or("-")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut builder = PromptBuilder::new();
        builder
            .add_section(SectionName::GeneralInstructions, GUIDELINE_PRIMER, NO_PROPS)
            .add_section(SectionName::Custom("disambiguation-task".into()), TASK, NO_PROPS)
            .add_exemplars(SHOTS);
        self.context.add_conversation_sections(&mut builder);
        builder.add_section(
            SectionName::Guidelines,
            "Ambiguity condition: {condition}\n\nGuidelines:\n{targets}",
            [
                ("condition", self.head.internal_representation().condition),
                ("targets", listed),
            ],
        );

        let checks: Vec<_> = (1..=self.targets.len())
            .map(|i| {
                json!({
                    "guideline_id": i.to_string(),
                    "tldr": "<str, short explanation>",
                    "requires_disambiguation": "<bool>",
                })
            })
            .collect();
        add_output_format(
            &mut builder,
            None,
            &json!({
                "tldr": "<str, short explanation of the decision>",
                "is_ambiguous": "<bool>",
                "guidelines": checks,
                "clarification_action": "<str, what the agent should ask; omit if not ambiguous>",
            }),
        )?;

        Ok(builder.build())
    }

    /// `None` when the answer carries no usable clarification
    fn outcome(&self, content: &DisambiguationMatchesSchema) -> Option<DisambiguationOutcome> {
        let Some(enriched_action) = content
            .clarification_action
            .as_deref()
            .map(str::trim)
            .filter(|action| !action.is_empty())
        else {
            warn!(head = %self.head.id, tldr = %content.tldr, "Ambiguity flagged without a clarification action; ignoring it");
            return None;
        };

        let mut targets: Vec<GuidelineId> = content
            .guidelines
            .iter()
            .filter(|check| check.requires_disambiguation)
            .filter_map(|check| self.short_ids.get(&check.guideline_id).cloned())
            .collect();

        if targets.is_empty() {
            debug!(head = %self.head.id, "Ambiguity flagged without targets; offering every target");
            targets = self.targets.iter().map(|g| g.id.clone()).collect();
        }

        Some(DisambiguationOutcome {
            targets,
            enriched_action: enriched_action.to_string(),
        })
    }
}

#[async_trait]
impl GuidelineMatchingBatch for DisambiguationBatch {
    fn name(&self) -> &str {
        "disambiguation"
    }

    fn size(&self) -> usize {
        self.targets.len() + 1
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

        let content = &result.content;
        debug!(
            head = %self.head.id,
            is_ambiguous = content.is_ambiguous,
            tldr = %content.tldr,
            "Disambiguation evaluated"
        );

        let outcome = if content.is_ambiguous {
            self.outcome(content)
        } else {
            None
        };

        let matches = match outcome {
            Some(outcome) => vec![
                GuidelineMatch::new(
                    self.head.clone(),
                    MAX_SCORE,
                    format!("disambiguation rationale: \"{}\"", content.tldr),
                )
                .with_annotations(MatchAnnotations {
                    previously_applied: PreviouslyApplied::No,
                    disambiguation: Some(outcome),
                    ..Default::default()
                }),
            ],
            None => Vec::new(),
        };

        Ok(GuidelineMatchingBatchResult {
            matches,
            generation_info: result.info,
        })
    }
}
