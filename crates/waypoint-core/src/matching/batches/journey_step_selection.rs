//! Journey step selection: where in a journey should the agent be next?
//!
//! Steps are presented to the oracle under short ids ("1", "2", ...) in
//! journey order. The oracle reports the path it advanced through; the path
//! is validated against the step graph before it is attached to the match.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{NO_PROPS, add_output_format, generate};
use crate::error::Result;
use crate::guidelines::{GuidelineMatch, MAX_SCORE, MatchAnnotations, PreviouslyApplied};
use crate::ids::GuidelineId;
use crate::journeys::{Journey, JourneyStep, JourneyStepGraph};
use crate::matching::batch::{GuidelineMatchingBatch, GuidelineMatchingBatchResult};
use crate::matching::context::BatchContext;
use crate::matching::policy::TemperatureLadder;
use crate::nlp::{Schema, SchematicGenerator};
use crate::prompt::{PromptBuilder, SectionName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyStepSelectionSchema {
    pub last_customer_message: String,
    pub journey_applies: bool,
    pub last_current_step: String,
    pub rationale: String,
    pub requires_backtracking: bool,
    #[serde(default)]
    pub backtracking_target_step: Option<String>,
    #[serde(default)]
    pub last_current_step_completed: Option<bool>,
    #[serde(default)]
    pub step_advance: Vec<Option<String>>,
    /// Short id of the step to execute, or "None" to leave the journey
    pub next_step: String,
}

impl Schema for JourneyStepSelectionSchema {
    const NAME: &'static str = "JourneyStepSelectionSchema";
}

const INSTRUCTIONS: &str = r#"GENERAL INSTRUCTIONS
-------------------
You are an AI agent named {agent_name} whose role is to engage in multi-turn conversations with customers on behalf of a business.
Your interactions are structured around predefined "journeys": systematic processes that guide customer conversations toward specific outcomes.

A journey consists of steps, each an action you must take, and transitions that determine which step comes next based on the customer's responses. Steps may carry flags that change how they behave.

Your task is to analyze the current state of the conversation and determine the next journey step, based on the last step that was performed."#;

const TASK: &str = r#"TASK DESCRIPTION
-------------------
Follow this process and document each decision in the output format.

1. Journey context check
- Set "journey_applies" to true unless the customer explicitly asks to leave the topic or changes the subject completely.
- If it is false, set "next_step" to "None" and skip the remaining checks.

2. Backtracking check
- Set "requires_backtracking" to true if the customer changed a decision made at an earlier step.
- If so, set "backtracking_target_step" to the step where that decision was made, and "next_step" to the step implied by the new decision.

3. Current step completion
- Set "last_current_step_completed" to true if the agent performed the action of the last executed step.
- A step flagged CUSTOMER_DEPENDENT is only complete once the customer has also responded to it.
- If the step is incomplete, set "next_step" to that same step and return it as the sole member of "step_advance".

4. Journey advancement
If the current step is complete, advance through its transitions until you reach:
- a step flagged REQUIRES_TOOL_CALLS
- a step whose transition you lack the information to resolve
- a step that requires telling the customer something new
Record every step you pass through in "step_advance", starting with the last executed step and ending with "next_step"."#;

const SHOTS: &[&str] = &[
    r#"Journey: Reset Password
STEP 1: Ask for the customer's account name
Step Flags:
- CUSTOMER_DEPENDENT: Requires customer action to be completed
- This is the last step that was executed. Begin advancing on from this step
TRANSITIONS:
-> If "the customer provided their account name" go to step 2
STEP 2: Ask whether they prefer email or text for the reset link
TRANSITIONS:
-> IF this step is completed, RETURN 'None'

Conversation:
[0] customer: I forgot my password
[1] agent: I can help. What's your account name?
[2] customer: it's leonardo_b

Expected result:
{"last_customer_message": "it's leonardo_b", "journey_applies": true, "last_current_step": "1", "rationale": "The account name was provided, so the agent should ask for the preferred channel", "requires_backtracking": false, "last_current_step_completed": true, "step_advance": ["1", "2"], "next_step": "2"}"#,
    r#"Journey: Reset Password
(steps as above; the last executed step was 2)

Conversation:
[0] customer: I forgot my password
[1] agent: I can help. What's your account name?
[2] customer: it's leonardo_b
[3] agent: Would you like the reset link by email or text?
[4] customer: Actually, my account name is leonardo_c, sorry

Expected result:
{"last_customer_message": "Actually, my account name is leonardo_c, sorry", "journey_applies": true, "last_current_step": "2", "rationale": "The customer corrected the account name given at step 1; the new name is already known so the flow continues at step 2", "requires_backtracking": true, "backtracking_target_step": "1", "next_step": "2"}"#,
];

const EXIT: &str = "None";

/// Batch selecting the next step of one journey
pub struct JourneyStepSelectionBatch {
    generator: Arc<dyn SchematicGenerator<JourneyStepSelectionSchema>>,
    journey: Journey,
    graph: JourneyStepGraph,
    /// Previous path in short ids
    previous_path: Vec<Option<String>>,
    context: BatchContext,
    temperatures: TemperatureLadder,
}

impl JourneyStepSelectionBatch {
    /// `previous_path` holds the step guideline ids visited in earlier turns
    pub fn new(
        generator: Arc<dyn SchematicGenerator<JourneyStepSelectionSchema>>,
        journey: Journey,
        graph: JourneyStepGraph,
        previous_path: &[Option<GuidelineId>],
        context: BatchContext,
        temperatures: TemperatureLadder,
    ) -> Self {
        let previous_path = previous_path
            .iter()
            .map(|step| {
                step.as_ref()
                    .and_then(|id| graph.position(id))
                    .map(|p| (p + 1).to_string())
            })
            .collect();

        Self {
            generator,
            journey,
            graph,
            previous_path,
            context,
            temperatures,
        }
    }

    pub fn journey(&self) -> &Journey {
        &self.journey
    }

    fn step(&self, short_id: &str) -> Option<&JourneyStep> {
        short_id
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.graph.steps().get(i))
    }

    fn short_id(&self, id: &GuidelineId) -> Option<String> {
        self.graph.position(id).map(|p| (p + 1).to_string())
    }

    fn last_executed(&self) -> Option<&str> {
        self.previous_path.last().and_then(|s| s.as_deref())
    }

    fn steps_section(&self) -> String {
        let mut listed = Vec::new();
        for (i, step) in self.graph.steps().iter().enumerate() {
            let Some(action) = step.guideline.content.action.as_deref() else {
                continue;
            };
            let short = (i + 1).to_string();
            let is_last = self.last_executed() == Some(short.as_str());

            let mut flags = Vec::new();
            if step.customer_dependent {
                flags.push("- CUSTOMER_DEPENDENT: Requires customer action to be completed");
            }
            // The last executed step already ran its tools
            if step.requires_tool_calls && !is_last {
                flags.push("- REQUIRES_TOOL_CALLS: Do not advance past this step");
            }
            if is_last {
                flags.push("- This is the last step that was executed. Begin advancing on from this step");
            }

            let transitions = if step.follow_ups.is_empty() {
                format!("-> IF this step is completed, RETURN '{}'", EXIT)
            } else {
                step.follow_ups
                    .iter()
                    .filter_map(|id| self.graph.step(id))
                    .map(|target| {
                        let destination = match target.guideline.content.action {
                            Some(_) => self.short_id(target.id()).unwrap_or_default(),
                            None => format!("EXIT JOURNEY, RETURN '{}'", EXIT),
                        };
                        format!(
                            "-> If \"{}\" go to step {}",
                            target.guideline.content.condition, destination
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            };

            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!("Step Flags:\n{}\n", flags.join("\n"))
            };
            listed.push(format!("STEP {}: {}\n{}TRANSITIONS:\n{}", short, action, flags, transitions));
        }

        format!("Journey: {}\n\nSteps:\n{}", self.journey.title, listed.join("\n\n"))
    }

    fn previous_path_section(&self) -> String {
        if self.previous_path.iter().all(Option::is_none) {
            return "The journey has just begun. No previous steps have been performed. Begin at step 1.".to_string();
        }

        let visited = self
            .previous_path
            .iter()
            .map(|s| s.as_deref().unwrap_or(EXIT))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "The steps visited in earlier messages of this conversation, in chronological order, are: [{}].\nYou may only backtrack to one of these steps.",
            visited
        )
    }

    fn build_prompt(&self) -> Result<String> {
        let mut builder = PromptBuilder::new();
        builder
            .add_section(
                SectionName::GeneralInstructions,
                INSTRUCTIONS,
                [("agent_name", self.context.strategy.agent.name.clone())],
            )
            .add_section(SectionName::Custom("journey-step-selection-task".into()), TASK, NO_PROPS)
            .add_exemplars(SHOTS);
        self.context.add_conversation_sections(&mut builder);
        builder
            .add_section(
                SectionName::Custom("journey-previous-path".into()),
                self.previous_path_section(),
                NO_PROPS,
            )
            .add_section(
                SectionName::Custom("journey-steps".into()),
                self.steps_section(),
                NO_PROPS,
            );

        add_output_format(
            &mut builder,
            None,
            &json!({
                "last_customer_message": "<str, the most recent message from the customer>",
                "journey_applies": "<bool, whether the journey should be continued>",
                "last_current_step": "<str, id of the last executed step>",
                "rationale": "<str, which step comes next and why>",
                "requires_backtracking": "<bool>",
                "backtracking_target_step": "<str, step to backtrack to; omit unless backtracking>",
                "last_current_step_completed": "<bool, omit when backtracking>",
                "step_advance": ["<str, step ids advanced through, from last_current_step to next_step>"],
                "next_step": "<str, id of the next step, or 'None' to leave the journey>",
            }),
        )?;

        Ok(builder.build())
    }

    fn is_legal_transition(&self, from: &Option<String>, to: &Option<String>, is_last: bool) -> bool {
        let Some(from) = from.as_deref().and_then(|s| self.step(s)) else {
            return false;
        };
        match to.as_deref().and_then(|s| self.step(s)) {
            Some(target) => from.follow_ups.contains(target.id()),
            // Leaving the journey is only possible at the end of the path
            None => is_last,
        }
    }

    /// Path of a backtrack: the revised step, then the step it now leads to
    ///
    /// The revised step must have been visited before and lead to the next
    /// step directly; otherwise only the next step is kept.
    fn backtrack_path(&self, content: &JourneyStepSelectionSchema) -> Vec<Option<String>> {
        let next = Some(content.next_step.clone());
        let Some(target) = content.backtracking_target_step.as_deref() else {
            return vec![next];
        };

        let visited = self.previous_path.iter().any(|s| s.as_deref() == Some(target));
        let from = Some(target.to_string());
        if target != content.next_step && visited && self.is_legal_transition(&from, &next, true) {
            vec![from, next]
        } else {
            if target != content.next_step {
                warn!(
                    journey = %self.journey.title,
                    backtrack_to = target,
                    next_step = %content.next_step,
                    "Backtracking target does not lead to the next step"
                );
            }
            vec![next]
        }
    }

    /// Validate the oracle's path and translate it to step guideline ids
    ///
    /// Any inconsistency collapses the path to the single next step. A
    /// trailing entry that is not a step marks a journey exit.
    pub(crate) fn resolve_path(&self, content: &JourneyStepSelectionSchema) -> Vec<Option<GuidelineId>> {
        let fallback = || vec![Some(content.next_step.clone())];

        let mut path = if content.requires_backtracking {
            self.backtrack_path(content)
        } else if content.step_advance.is_empty() {
            fallback()
        } else {
            content.step_advance.clone()
        };

        if !content.requires_backtracking {
            if let Some(last) = self.last_executed() {
                if path.first().and_then(|s| s.as_deref()) != Some(last) {
                    warn!(
                        journey = %self.journey.title,
                        previous = ?self.previous_path,
                        returned = ?path,
                        "Illegal journey path: does not continue from the last executed step"
                    );
                    path = fallback();
                }
            }

            let transitions = path.len().saturating_sub(1);
            let illegal = path.windows(2).enumerate().find(|(i, pair)| {
                !self.is_legal_transition(&pair[0], &pair[1], i + 1 == transitions)
            });
            if let Some((_, pair)) = illegal {
                warn!(
                    journey = %self.journey.title,
                    from = ?pair[0],
                    to = ?pair[1],
                    returned = ?path,
                    "Illegal transition in journey path"
                );
                path = fallback();
            }
        }

        path.into_iter()
            .map(|s| s.and_then(|s| self.step(&s).map(|step| step.id().clone())))
            .collect()
    }
}

#[async_trait]
impl GuidelineMatchingBatch for JourneyStepSelectionBatch {
    fn name(&self) -> &str {
        "journey_step_selection"
    }

    fn size(&self) -> usize {
        self.graph.steps().len()
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
        let path = self.resolve_path(content);

        debug!(
            journey = %self.journey.title,
            journey_applies = content.journey_applies,
            backtracking = content.requires_backtracking,
            next_step = %content.next_step,
            path = ?path,
            "Journey step selected"
        );

        let next = content
            .journey_applies
            .then(|| self.step(&content.next_step))
            .flatten();

        let matches = match next {
            Some(step) => vec![
                GuidelineMatch::new(step.guideline.clone(), MAX_SCORE, content.rationale.clone())
                    .with_annotations(MatchAnnotations {
                        previously_applied: PreviouslyApplied::Irrelevant,
                        journey_path: Some(path),
                        requires_backtracking: content.requires_backtracking,
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
