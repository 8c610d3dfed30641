//! Collaborator entities rendered into prompts

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, CustomerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AgentId::generate(),
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CustomerId::generate(),
            name: name.into(),
        }
    }

    /// Placeholder for sessions without an identified customer
    pub fn guest() -> Self {
        Self::new("Guest")
    }
}

/// A named value known about the customer or session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextVariable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// Something the agent is able to do for the customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub title: String,
    pub description: String,
}
