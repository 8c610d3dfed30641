//! Response analysis: did the staged reply carry out the matched actions?

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{GUIDELINE_PRIMER, NO_PROPS, add_guidelines_section, add_output_format, format_guidelines, generate};
use crate::error::Result;
use crate::guidelines::GuidelineMatch;
use crate::matching::batch::{
    AnalyzedGuideline, GuidelineIndex, ResponseAnalysisBatch, ResponseAnalysisBatchResult,
};
use crate::matching::context::ReportAnalysisContext;
use crate::matching::policy::TemperatureLadder;
use crate::nlp::{Schema, SchematicGenerator};
use crate::prompt::{PromptBuilder, SectionName};

/// How much of an action the agent carried out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedDegree {
    #[default]
    No,
    Partially,
    Fully,
}

impl fmt::Display for AppliedDegree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Partially => write!(f, "partially"),
            Self::Fully => write!(f, "fully"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAnalysisCheck {
    pub guideline_id: String,
    #[serde(default)]
    pub action: String,
    pub guideline_applied_rationale: String,
    pub guideline_applied_degree: AppliedDegree,
    /// Only meaningful for a partial application
    #[serde(default)]
    pub is_missing_part_consequential: bool,
}

impl ResponseAnalysisCheck {
    /// A partial application counts when what is missing does not matter
    pub fn is_applied(&self) -> bool {
        match self.guideline_applied_degree {
            AppliedDegree::Fully => true,
            AppliedDegree::Partially => !self.is_missing_part_consequential,
            AppliedDegree::No => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAnalysisSchema {
    #[serde(default)]
    pub checks: Vec<ResponseAnalysisCheck>,
}

impl Schema for ResponseAnalysisSchema {
    const NAME: &'static str = "ResponseAnalysisSchema";
}

const TASK: &str = r#"TASK DESCRIPTION
-----------------
The agent has just produced its latest message. Each guideline below was matched for this turn and has not yet been marked as applied.
For every guideline, decide to what degree the agent's latest message carried out its action: "no", "partially" or "fully".
- Judge only the action. Whether the condition held is not in question.
- When an action depends on the customer (for example asking for information), it counts as carried out once the agent did its part.
- When an action was only partially carried out, decide whether the missing part is consequential. A missing part that does not change the outcome for the customer is not consequential."#;

const SHOTS: &[&str] = &[
    r#"Conversation:
[0] customer: Hi, I'm interested in a job with you. Do you have anything open?
[1] agent: Yes, we have open positions! Where are you located, and what kind of role are you looking for?

Guidelines:
- guideline_id: g1
  condition: the customer asks about open positions
  action: emphasize that we have open positions and that we offer 10k openings overall

Expected result:
{"checks": [
  {"guideline_id": "g1", "action": "emphasize that we have open positions and that we offer 10k openings overall", "guideline_applied_rationale": "The agent mentioned open positions but never mentioned the 10k openings, which is a key selling point", "guideline_applied_degree": "partially", "is_missing_part_consequential": true}
]}"#,
];

/// Detects which matched guidelines the staged reply already applied
pub struct PreviouslyAppliedDetectionBatch {
    generator: Arc<dyn SchematicGenerator<ResponseAnalysisSchema>>,
    guidelines: GuidelineIndex,
    context: Arc<ReportAnalysisContext>,
    temperatures: TemperatureLadder,
}

impl PreviouslyAppliedDetectionBatch {
    pub fn new(
        generator: Arc<dyn SchematicGenerator<ResponseAnalysisSchema>>,
        matches: &[GuidelineMatch],
        context: Arc<ReportAnalysisContext>,
        temperatures: TemperatureLadder,
    ) -> Self {
        Self {
            generator,
            guidelines: GuidelineIndex::new(matches.iter().map(|m| m.guideline.clone())),
            context,
            temperatures,
        }
    }

    fn build_prompt(&self) -> Result<String> {
        let mut builder = PromptBuilder::new();
        builder
            .add_section(SectionName::GeneralInstructions, GUIDELINE_PRIMER, NO_PROPS)
            .add_section(SectionName::Custom("response-analysis-task".into()), TASK, NO_PROPS)
            .add_exemplars(SHOTS);
        self.context.add_conversation_sections(&mut builder);
        add_guidelines_section(&mut builder, format_guidelines(self.guidelines.iter()));

        let checks: Vec<_> = self
            .guidelines
            .iter()
            .map(|g| {
                json!({
                    "guideline_id": g.id,
                    "action": g.content.action,
                    "guideline_applied_rationale": "<str, whether and how the agent carried out the action>",
                    "guideline_applied_degree": "<str, one of 'no', 'partially' or 'fully'>",
                    "is_missing_part_consequential": "<bool, only when partially applied>",
                })
            })
            .collect();
        add_output_format(&mut builder, Some(self.guidelines.len()), &json!({ "checks": checks }))?;

        Ok(builder.build())
    }
}

#[async_trait]
impl ResponseAnalysisBatch for PreviouslyAppliedDetectionBatch {
    fn name(&self) -> &str {
        "response_analysis"
    }

    async fn process(&self) -> Result<ResponseAnalysisBatchResult> {
        let prompt = self.build_prompt()?;
        let result = generate(
            self.generator.as_ref(),
            self.name(),
            &prompt,
            self.temperatures.next(),
        )
        .await?;

        if result.content.checks.is_empty() {
            warn!(batch = %self.name(), guidelines = self.guidelines.len(), "No checks generated");
        }

        let analyzed_guidelines: Vec<AnalyzedGuideline> = result
            .content
            .checks
            .iter()
            .filter_map(|check| {
                let guideline = self.guidelines.resolve(self.name(), &check.guideline_id)?;
                debug!(
                    guideline_id = %guideline.id,
                    degree = %check.guideline_applied_degree,
                    rationale = %check.guideline_applied_rationale,
                    "Action analyzed"
                );
                Some(AnalyzedGuideline {
                    guideline: guideline.clone(),
                    is_previously_applied: check.is_applied(),
                })
            })
            .collect();

        Ok(ResponseAnalysisBatchResult {
            analyzed_guidelines,
            generation_info: result.info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(degree: AppliedDegree, consequential: bool) -> ResponseAnalysisCheck {
        ResponseAnalysisCheck {
            guideline_id: "g1".to_string(),
            action: "greet".to_string(),
            guideline_applied_rationale: "test".to_string(),
            guideline_applied_degree: degree,
            is_missing_part_consequential: consequential,
        }
    }

    #[test]
    fn test_partial_application_depends_on_missing_part() {
        assert!(check(AppliedDegree::Fully, false).is_applied());
        assert!(check(AppliedDegree::Partially, false).is_applied());
        assert!(!check(AppliedDegree::Partially, true).is_applied());
        assert!(!check(AppliedDegree::No, false).is_applied());
    }

    #[test]
    fn test_degree_parses_lowercase() {
        let check: ResponseAnalysisCheck = serde_json::from_str(
            r#"{"guideline_id": "g1", "guideline_applied_rationale": "r", "guideline_applied_degree": "partially"}"#,
        )
        .unwrap();
        assert_eq!(check.guideline_applied_degree, AppliedDegree::Partially);
        assert!(check.is_applied());
    }
}
