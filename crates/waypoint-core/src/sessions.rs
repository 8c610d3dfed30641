//! Sessions and interaction events, read-only from the matcher's side

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ids::{AgentId, CustomerId, GuidelineId, JourneyId, SessionId};

/// Who produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Customer,
    CustomerUi,
    HumanAgent,
    HumanAgentOnBehalfOfAiAgent,
    AiAgent,
    System,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Customer | Self::CustomerUi => "customer",
            Self::HumanAgent | Self::HumanAgentOnBehalfOfAiAgent | Self::AiAgent => "agent",
            Self::System => "system",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Tool,
    Status,
    Custom,
}

/// An entry of the interaction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub source: EventSource,
    pub kind: EventKind,
    pub offset: u64,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

impl Event {
    pub fn message(source: EventSource, offset: u64, text: impl Into<String>) -> Self {
        Self {
            source,
            kind: EventKind::Message,
            offset,
            created_at: Utc::now(),
            data: serde_json::json!({ "message": text.into() }),
        }
    }

    pub fn tool(offset: u64, data: Value) -> Self {
        Self {
            source: EventSource::System,
            kind: EventKind::Tool,
            offset,
            created_at: Utc::now(),
            data,
        }
    }

    /// Message text, for message events
    pub fn text(&self) -> Option<&str> {
        match self.kind {
            EventKind::Message => self.data.get("message").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn is_from_customer(&self) -> bool {
        matches!(self.source, EventSource::Customer | EventSource::CustomerUi)
    }
}

/// Per-session state the agent accumulates across turns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Guidelines whose action was already carried out in this session
    #[serde(default)]
    pub applied_guideline_ids: HashSet<GuidelineId>,
    /// Steps visited so far, per active journey
    #[serde(default)]
    pub journey_paths: HashMap<JourneyId, Vec<Option<GuidelineId>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub customer_id: CustomerId,
    #[serde(default)]
    pub agent_state: AgentState,
}

impl Session {
    pub fn new(agent_id: AgentId, customer_id: CustomerId) -> Self {
        Self {
            id: SessionId::generate(),
            agent_id,
            customer_id,
            agent_state: AgentState::default(),
        }
    }

    pub fn with_applied(mut self, ids: impl IntoIterator<Item = GuidelineId>) -> Self {
        self.agent_state.applied_guideline_ids.extend(ids);
        self
    }

    pub fn with_journey_path(mut self, journey: JourneyId, path: Vec<Option<GuidelineId>>) -> Self {
        self.agent_state.journey_paths.insert(journey, path);
        self
    }

    pub fn journey_path(&self, journey: &JourneyId) -> &[Option<GuidelineId>] {
        self.agent_state
            .journey_paths
            .get(journey)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
