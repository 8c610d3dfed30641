//! Journey value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GuidelineId, JourneyId, TagId};

/// A scripted multi-step interaction flow
///
/// Steps are projected as guidelines carrying a `JourneyStepLink`; the
/// journey itself only records their order and the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub id: JourneyId,
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Guidelines whose match activates the journey
    #[serde(default)]
    pub conditions: Vec<GuidelineId>,
    /// Entry step; defaults to the first listed step
    #[serde(default)]
    pub root: Option<GuidelineId>,
    #[serde(default)]
    pub steps: Vec<GuidelineId>,
    #[serde(default)]
    pub tags: Vec<TagId>,
}

impl Journey {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: JourneyId::generate(),
            created_at: Utc::now(),
            title: title.into(),
            description: String::new(),
            conditions: Vec::new(),
            root: None,
            steps: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<JourneyId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<GuidelineId>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_steps(mut self, steps: Vec<GuidelineId>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_root(mut self, root: impl Into<GuidelineId>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Tag that journey-scoped guidelines depend on
    pub fn tag(&self) -> TagId {
        TagId::for_journey(&self.id)
    }

    pub fn root_step(&self) -> Option<&GuidelineId> {
        self.root.as_ref().or_else(|| self.steps.first())
    }
}
