//! JSON fixtures read by `plan` and `resolve`

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use waypoint_core::guidelines::{CustomerDependentAction, Guideline, GuidelineMatch};
use waypoint_core::ids::{GuidelineId, TagId};
use waypoint_core::relationships::{
    InMemoryRelationshipStore, RelationshipEntity, RelationshipKind, RelationshipStore,
};

/// Compact guideline description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureGuideline {
    pub id: String,
    pub condition: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub continuous: bool,
    /// `[customer_action, agent_action]`
    #[serde(default)]
    pub customer_dependent: Option<(String, String)>,
}

impl FixtureGuideline {
    fn to_guideline(&self) -> anyhow::Result<Guideline> {
        let mut guideline = Guideline::new(self.condition.clone(), self.action.clone())
            .with_id(self.id.as_str())
            .with_tags(self.tags.iter().map(|t| TagId::from(t.as_str())).collect());
        if self.continuous {
            guideline = guideline.continuous();
        }
        if let Some((customer, agent)) = &self.customer_dependent {
            guideline = guideline.customer_dependent(CustomerDependentAction::new(customer, agent));
        }
        guideline
            .validate()
            .with_context(|| format!("Invalid guideline '{}'", self.id))?;
        Ok(guideline)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRelationship {
    pub source: RelationshipEntity,
    pub target: RelationshipEntity,
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureMatch {
    pub guideline_id: String,
    pub score: u8,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub guidelines: Vec<FixtureGuideline>,
    #[serde(default)]
    pub relationships: Vec<FixtureRelationship>,
    /// Guidelines already applied earlier in the session
    #[serde(default)]
    pub applied: Vec<String>,
    #[serde(default)]
    pub matches: Vec<FixtureMatch>,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse fixture: {}", path.display()))
    }

    pub fn guidelines(&self) -> anyhow::Result<Vec<Guideline>> {
        self.guidelines.iter().map(FixtureGuideline::to_guideline).collect()
    }

    pub fn applied(&self) -> HashSet<GuidelineId> {
        self.applied.iter().map(|id| GuidelineId::from(id.as_str())).collect()
    }

    pub async fn relationship_store(&self) -> anyhow::Result<InMemoryRelationshipStore> {
        let store = InMemoryRelationshipStore::new();
        for r in &self.relationships {
            store
                .create_relationship(r.source.clone(), r.target.clone(), r.kind)
                .await?;
        }
        Ok(store)
    }

    /// Matches resolved against the fixture's guidelines
    pub fn matches(&self, guidelines: &[Guideline]) -> anyhow::Result<Vec<GuidelineMatch>> {
        let by_id: HashMap<&str, &Guideline> =
            guidelines.iter().map(|g| (g.id.as_str(), g)).collect();

        self.matches
            .iter()
            .map(|m| {
                let guideline = by_id.get(m.guideline_id.as_str()).ok_or_else(|| {
                    anyhow!("Match refers to unknown guideline '{}'", m.guideline_id)
                })?;
                Ok(GuidelineMatch::new(
                    (*guideline).clone(),
                    m.score,
                    m.rationale.clone(),
                ))
            })
            .collect()
    }
}
