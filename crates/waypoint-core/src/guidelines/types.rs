//! Guideline value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::annotations::{CustomerDependentAction, GuidelineAnnotations, JourneyStepLink};
use crate::error::Result;
use crate::ids::{GuidelineId, TagId};

/// Condition/action pair of a guideline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineContent {
    pub condition: String,
    /// `None` marks an observational guideline
    #[serde(default)]
    pub action: Option<String>,
}

/// A natural-language behavioral rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub id: GuidelineId,
    pub created_at: DateTime<Utc>,
    pub content: GuidelineContent,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Empty means the guideline is global
    #[serde(default)]
    pub tags: Vec<TagId>,
    #[serde(default)]
    pub annotations: GuidelineAnnotations,
}

fn default_enabled() -> bool {
    true
}

/// Condition and action as shown to the oracle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidelineRepresentation {
    pub condition: String,
    pub action: Option<String>,
}

impl Guideline {
    /// Create an enabled, untagged guideline with a fresh id
    pub fn new(condition: impl Into<String>, action: Option<String>) -> Self {
        Self {
            id: GuidelineId::generate(),
            created_at: Utc::now(),
            content: GuidelineContent {
                condition: condition.into(),
                action,
            },
            enabled: true,
            tags: Vec::new(),
            annotations: GuidelineAnnotations::default(),
        }
    }

    /// Guideline that only signals a condition
    pub fn observational(condition: impl Into<String>) -> Self {
        Self::new(condition, None)
    }

    pub fn actionable(condition: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(condition, Some(action.into()))
    }

    pub fn with_id(mut self, id: impl Into<GuidelineId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<TagId>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_annotations(mut self, annotations: GuidelineAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn continuous(mut self) -> Self {
        self.annotations.continuous = true;
        self
    }

    pub fn customer_dependent(mut self, data: CustomerDependentAction) -> Self {
        self.annotations.customer_dependent_action = Some(data);
        self
    }

    pub fn with_agent_intention(mut self, condition: impl Into<String>) -> Self {
        self.annotations.agent_intention_condition = Some(condition.into());
        self
    }

    pub fn with_journey_step(mut self, link: JourneyStepLink) -> Self {
        self.annotations.journey_step = Some(link);
        self
    }

    pub fn is_observational(&self) -> bool {
        self.content.action.is_none()
    }

    pub fn has_tag(&self, tag: &TagId) -> bool {
        self.tags.contains(tag)
    }

    pub fn validate(&self) -> Result<()> {
        self.annotations.validate(self.content.action.is_some())
    }

    /// Condition and action as presented in prompts
    ///
    /// An agent-intention rewrite of the condition takes precedence when
    /// present and non-empty.
    pub fn internal_representation(&self) -> GuidelineRepresentation {
        let condition = match self.annotations.agent_intention_condition.as_deref() {
            Some(intention) if !intention.is_empty() => intention.to_string(),
            _ => self.content.condition.clone(),
        };

        GuidelineRepresentation {
            condition,
            action: self.content.action.clone(),
        }
    }
}
