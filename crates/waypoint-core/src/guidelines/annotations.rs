//! Typed categorization hints attached to guidelines

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::ids::{GuidelineId, JourneyId};

/// Split of an action between the agent and the customer
///
/// An action like "ask for the account number" is only complete once the
/// customer has answered, so reapplying it depends on the customer's side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDependentAction {
    pub is_customer_dependent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_action: Option<String>,
}

impl CustomerDependentAction {
    pub fn new(customer_action: impl Into<String>, agent_action: impl Into<String>) -> Self {
        Self {
            is_customer_dependent: true,
            customer_action: Some(customer_action.into()),
            agent_action: Some(agent_action.into()),
        }
    }
}

/// Link between a guideline and the journey step it projects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyStepLink {
    pub journey_id: JourneyId,
    /// Step guidelines reachable from this step, in transition order
    #[serde(default)]
    pub follow_ups: Vec<GuidelineId>,
    /// The step runs a tool; step advancement must stop here
    #[serde(default)]
    pub requires_tool_calls: bool,
}

impl JourneyStepLink {
    pub fn new(journey_id: JourneyId) -> Self {
        Self {
            journey_id,
            follow_ups: Vec::new(),
            requires_tool_calls: false,
        }
    }

    pub fn with_follow_ups(mut self, follow_ups: Vec<GuidelineId>) -> Self {
        self.follow_ups = follow_ups;
        self
    }

    pub fn with_tool_calls(mut self) -> Self {
        self.requires_tool_calls = true;
        self
    }
}

/// Categorization hints carried by a guideline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineAnnotations {
    /// Re-evaluated every turn regardless of prior application
    #[serde(default)]
    pub continuous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_dependent_action: Option<CustomerDependentAction>,
    /// Condition phrased from the agent's point of view; preferred in prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_intention_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_step: Option<JourneyStepLink>,
}

impl GuidelineAnnotations {
    pub fn is_customer_dependent(&self) -> bool {
        self.customer_dependent_action
            .as_ref()
            .is_some_and(|data| data.is_customer_dependent)
    }

    /// Check the annotations against the guideline they belong to
    pub fn validate(&self, has_action: bool) -> Result<()> {
        if !has_action && self.is_customer_dependent() {
            return Err(Error::InvalidInput(
                "an observational guideline cannot have a customer-dependent action".to_string(),
            ));
        }

        if !has_action && self.continuous {
            return Err(Error::InvalidInput(
                "an observational guideline cannot be continuous".to_string(),
            ));
        }

        if let Some(step) = &self.journey_step {
            let mut seen = HashSet::new();
            if let Some(dup) = step.follow_ups.iter().find(|id| !seen.insert(*id)) {
                return Err(Error::InvalidInput(format!(
                    "journey step lists follow-up '{}' more than once",
                    dup
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_dependent_requires_action() {
        let annotations = GuidelineAnnotations {
            customer_dependent_action: Some(CustomerDependentAction::new(
                "provide account number",
                "ask for account number",
            )),
            ..Default::default()
        };

        assert!(annotations.is_customer_dependent());
        assert!(annotations.validate(true).is_ok());
        assert!(annotations.validate(false).is_err());
    }

    #[test]
    fn test_duplicate_follow_ups_rejected() {
        let annotations = GuidelineAnnotations {
            journey_step: Some(
                JourneyStepLink::new("j1".into())
                    .with_follow_ups(vec!["s2".into(), "s2".into()]),
            ),
            ..Default::default()
        };

        let err = annotations.validate(true).unwrap_err();
        assert!(err.to_string().contains("s2"));
    }

    #[test]
    fn test_annotations_deserialize_with_defaults() {
        let annotations: GuidelineAnnotations =
            serde_json::from_str(r#"{"continuous": true}"#).unwrap();
        assert!(annotations.continuous);
        assert!(!annotations.is_customer_dependent());
        assert!(annotations.journey_step.is_none());
    }
}
