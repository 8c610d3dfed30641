//! Matching batch variants, one per guideline category
//!
//! Every variant follows the same shape: build a prompt from shared
//! conversation sections plus category-specific instructions and examples,
//! invoke its oracle once, and turn the structured answer into matches.

mod actionable;
mod customer_dependent;
mod disambiguation;
mod journey_step_selection;
mod observational;
mod previously_applied;
mod response_analysis;

pub use actionable::{ActionableBatch, ActionableCheck, ActionableMatchesSchema};
pub use customer_dependent::{
    CustomerDependentBatch, CustomerDependentCheck, CustomerDependentMatchesSchema,
};
pub use disambiguation::{DisambiguationBatch, DisambiguationMatchesSchema, DisambiguationTargetCheck};
pub use journey_step_selection::{JourneyStepSelectionBatch, JourneyStepSelectionSchema};
pub use observational::{ObservationalBatch, ObservationalCheck, ObservationalMatchesSchema};
pub use previously_applied::{
    PreviouslyAppliedBatch, PreviouslyAppliedCheck, PreviouslyAppliedMatchesSchema,
};
pub use response_analysis::{
    AppliedDegree, PreviouslyAppliedDetectionBatch, ResponseAnalysisCheck, ResponseAnalysisSchema,
};

use serde_json::Value;
use std::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::guidelines::Guideline;
use crate::nlp::{GenerationHints, Schema, SchematicGenerationResult, SchematicGenerator};
use crate::prompt::{PromptBuilder, SectionName};

pub(crate) const GUIDELINE_PRIMER: &str = r#"GENERAL INSTRUCTIONS
-----------------
In our system, the behavior of a conversational AI agent is guided by "guidelines". The agent makes use of these guidelines whenever it interacts with a user (also referred to as the customer).
Each guideline is composed of two parts:
- "condition": a natural-language condition that specifies when the guideline should apply. We test it against the conversation in its current state to decide whether the guideline participates in generating the next reply.
- "action": a natural-language instruction the agent follows whenever the condition applies. Instructions apply only to the agent, never to the customer. Some guidelines have no action; they only observe that something holds."#;

pub(crate) const NO_PROPS: [(&str, &str); 0] = [];

/// Render guidelines for the oracle, keyed by their real ids
pub(crate) fn format_guidelines<'a>(guidelines: impl IntoIterator<Item = &'a Guideline>) -> String {
    guidelines
        .into_iter()
        .map(|g| {
            let repr = g.internal_representation();
            match repr.action {
                Some(action) => format!(
                    "- guideline_id: {}\n  condition: {}\n  action: {}",
                    g.id, repr.condition, action
                ),
                None => format!("- guideline_id: {}\n  condition: {}", g.id, repr.condition),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn add_guidelines_section(builder: &mut PromptBuilder, listed: String) {
    builder.add_section(
        SectionName::Guidelines,
        "GUIDELINES\n-----------------\n{guidelines}",
        [("guidelines", listed)],
    );
}

/// Ask for a JSON object shaped like `structure`
pub(crate) fn add_output_format(
    builder: &mut PromptBuilder,
    expected_entries: Option<usize>,
    structure: &Value,
) -> Result<()> {
    let preamble = match expected_entries {
        Some(n) => format!(
            "IMPORTANT: there are exactly {} guidelines in the list for you to check.\n\n",
            n
        ),
        None => String::new(),
    };

    builder.add_section(
        SectionName::OutputFormat,
        "{preamble}OUTPUT FORMAT\n-----------------\nRespond with a single JSON object in exactly the following structure:\n```json\n{structure}\n```",
        [
            ("preamble", preamble),
            ("structure", serde_json::to_string_pretty(structure)?),
        ],
    );
    Ok(())
}

/// Invoke an oracle at `temperature`, logging timing and usage
pub(crate) async fn generate<T: Schema>(
    generator: &dyn SchematicGenerator<T>,
    batch: &str,
    prompt: &str,
    temperature: f32,
) -> Result<SchematicGenerationResult<T>> {
    debug!(
        batch = %batch,
        schema = T::NAME,
        temperature,
        prompt_length = prompt.len(),
        "Invoking oracle"
    );

    let started = Instant::now();
    let result = generator
        .generate(prompt, &GenerationHints::with_temperature(temperature))
        .await?;

    debug!(
        batch = %batch,
        duration_ms = started.elapsed().as_millis() as u64,
        input_tokens = result.info.usage.input_tokens,
        output_tokens = result.info.usage.output_tokens,
        "Oracle returned"
    );

    Ok(result)
}
