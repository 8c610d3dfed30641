//! Relationship (edge) types between guidelines and tags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{GuidelineId, RelationshipId, TagId};

/// Kinds of directed relationships
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Source matching implies target matching
    Entailment,
    /// Source is considered before target
    Precedence,
    /// Source requires target to be in place
    Requirement,
    /// Source yields to target when both match
    Priority,
    /// Source keeps target active across turns
    Persistence,
    /// Source structurally depends on target
    Dependency,
    /// Source is an ambiguity that target resolves
    Disambiguation,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entailment => "entailment",
            Self::Precedence => "precedence",
            Self::Requirement => "requirement",
            Self::Priority => "priority",
            Self::Persistence => "persistence",
            Self::Dependency => "dependency",
            Self::Disambiguation => "disambiguation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "entailment" => Some(Self::Entailment),
            "precedence" => Some(Self::Precedence),
            "requirement" => Some(Self::Requirement),
            "priority" => Some(Self::Priority),
            "persistence" => Some(Self::Persistence),
            "dependency" => Some(Self::Dependency),
            "disambiguation" => Some(Self::Disambiguation),
            _ => None,
        }
    }

    pub fn all() -> &'static [RelationshipKind] {
        &[
            Self::Entailment,
            Self::Precedence,
            Self::Requirement,
            Self::Priority,
            Self::Persistence,
            Self::Dependency,
            Self::Disambiguation,
        ]
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a relationship endpoint refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Guideline,
    Tag,
}

/// One endpoint of a relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RelationshipEntity {
    Guideline(GuidelineId),
    Tag(TagId),
}

impl RelationshipEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Guideline(_) => EntityKind::Guideline,
            Self::Tag(_) => EntityKind::Tag,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Guideline(id) => id.as_str(),
            Self::Tag(id) => id.as_str(),
        }
    }

    pub fn as_guideline(&self) -> Option<&GuidelineId> {
        match self {
            Self::Guideline(id) => Some(id),
            Self::Tag(_) => None,
        }
    }

    pub fn as_tag(&self) -> Option<&TagId> {
        match self {
            Self::Tag(id) => Some(id),
            Self::Guideline(_) => None,
        }
    }
}

impl From<GuidelineId> for RelationshipEntity {
    fn from(id: GuidelineId) -> Self {
        Self::Guideline(id)
    }
}

impl From<TagId> for RelationshipEntity {
    fn from(id: TagId) -> Self {
        Self::Tag(id)
    }
}

impl fmt::Display for RelationshipEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guideline(id) => write!(f, "guideline:{}", id),
            Self::Tag(id) => write!(f, "tag:{}", id),
        }
    }
}

/// A directed typed edge
///
/// Endpoints and kind are fixed at creation; a relationship can only be
/// deleted, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub created_at: DateTime<Utc>,
    pub source: RelationshipEntity,
    pub target: RelationshipEntity,
    pub kind: RelationshipKind,
}

impl Relationship {
    pub fn new(
        source: RelationshipEntity,
        target: RelationshipEntity,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            id: RelationshipId::generate(),
            created_at: Utc::now(),
            source,
            target,
            kind,
        }
    }

    pub fn connects(&self, source: &RelationshipEntity, target: &RelationshipEntity) -> bool {
        &self.source == source && &self.target == target
    }
}
