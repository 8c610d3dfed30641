//! Prompt assembly from named sections
//!
//! Each section is a template with `{key}` placeholders and a property bag.
//! Placeholders without a matching property are left untouched, so JSON
//! examples inside templates need no escaping.

use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

use crate::entities::{Agent, Capability, ContextVariable, Customer, GlossaryTerm};
use crate::journeys::Journey;
use crate::sessions::Event;

/// Well-known section names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectionName {
    GeneralInstructions,
    Exemplars,
    AgentIdentity,
    CustomerIdentity,
    ContextVariables,
    Glossary,
    Capabilities,
    InteractionHistory,
    StagedEvents,
    Journeys,
    Guidelines,
    OutputFormat,
    Custom(String),
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeneralInstructions => write!(f, "general-instructions"),
            Self::Exemplars => write!(f, "exemplars"),
            Self::AgentIdentity => write!(f, "agent-identity"),
            Self::CustomerIdentity => write!(f, "customer-identity"),
            Self::ContextVariables => write!(f, "context-variables"),
            Self::Glossary => write!(f, "glossary"),
            Self::Capabilities => write!(f, "capabilities"),
            Self::InteractionHistory => write!(f, "interaction-history"),
            Self::StagedEvents => write!(f, "staged-events"),
            Self::Journeys => write!(f, "journeys"),
            Self::Guidelines => write!(f, "guidelines"),
            Self::OutputFormat => write!(f, "output-format"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptSection {
    pub name: SectionName,
    pub template: String,
    pub props: BTreeMap<String, String>,
}

impl PromptSection {
    pub fn render(&self) -> String {
        render_template(&self.template, &self.props)
    }
}

/// Substitute `{key}` placeholders present in `props`
pub fn render_template(template: &str, props: &BTreeMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in props {
        rendered = rendered.replace(&format!("{{{}}}", key), value);
    }
    rendered
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_section<K, V>(
        &mut self,
        name: SectionName,
        template: impl Into<String>,
        props: impl IntoIterator<Item = (K, V)>,
    ) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.sections.push(PromptSection {
            name,
            template: template.into(),
            props: props
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        self
    }

    fn add_text(&mut self, name: SectionName, text: String) -> &mut Self {
        self.add_section(name, text, std::iter::empty::<(String, String)>())
    }

    pub fn has_section(&self, name: &SectionName) -> bool {
        self.sections.iter().any(|s| &s.name == name)
    }

    pub fn sections(&self) -> &[PromptSection] {
        &self.sections
    }

    pub fn add_agent_identity(&mut self, agent: &Agent) -> &mut Self {
        let description = agent
            .description
            .as_deref()
            .map(|d| format!("\nDescription: {}", d))
            .unwrap_or_default();

        self.add_section(
            SectionName::AgentIdentity,
            "You are an AI agent named {agent_name}.{agent_description}",
            [("agent_name", agent.name.clone()), ("agent_description", description)],
        )
    }

    pub fn add_customer_identity(&mut self, customer: &Customer) -> &mut Self {
        self.add_section(
            SectionName::CustomerIdentity,
            "The customer you are interacting with is called {customer_name}.",
            [("customer_name", customer.name.clone())],
        )
    }

    pub fn add_context_variables(&mut self, variables: &[ContextVariable]) -> &mut Self {
        if variables.is_empty() {
            return self;
        }

        let listed = variables
            .iter()
            .map(|v| format!("- {}: {}", v.name, v.value))
            .collect::<Vec<_>>()
            .join("\n");

        self.add_section(
            SectionName::ContextVariables,
            "The following is information that you're given about the customer and context of the interaction:\n###\n{context_values}\n###",
            [("context_values", listed)],
        )
    }

    pub fn add_glossary(&mut self, terms: &[GlossaryTerm]) -> &mut Self {
        if terms.is_empty() {
            return self;
        }

        let listed = terms
            .iter()
            .map(|t| {
                if t.synonyms.is_empty() {
                    format!("- {}: {}", t.name, t.description)
                } else {
                    format!("- {} ({}): {}", t.name, t.synonyms.join(", "), t.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        self.add_section(
            SectionName::Glossary,
            "The following is a glossary of the business. Use it to interpret terms in the conversation:\n###\n{terms}\n###",
            [("terms", listed)],
        )
    }

    pub fn add_capabilities(&mut self, capabilities: &[Capability]) -> &mut Self {
        if capabilities.is_empty() {
            return self;
        }

        let listed = capabilities
            .iter()
            .map(|c| format!("- {}: {}", c.title, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        self.add_section(
            SectionName::Capabilities,
            "The agent is able to do the following for the customer:\n###\n{capabilities}\n###",
            [("capabilities", listed)],
        )
    }

    pub fn add_interaction_history(&mut self, events: &[Event]) -> &mut Self {
        if events.is_empty() {
            return self.add_text(
                SectionName::InteractionHistory,
                "The interaction with the customer has just begun; no messages were sent by either party.".to_string(),
            );
        }

        self.add_section(
            SectionName::InteractionHistory,
            "The following is the interaction so far, from oldest to newest:\n###\n{interaction_events}\n###",
            [("interaction_events", format_events(events))],
        )
    }

    pub fn add_staged_events(&mut self, events: &[Event]) -> &mut Self {
        if events.is_empty() {
            return self;
        }

        self.add_section(
            SectionName::StagedEvents,
            "Here are the most recent events produced during this turn, not yet visible to the customer:\n###\n{staged_events}\n###",
            [("staged_events", format_events(events))],
        )
    }

    pub fn add_journeys(&mut self, journeys: &[Journey]) -> &mut Self {
        if journeys.is_empty() {
            return self;
        }

        let listed = journeys
            .iter()
            .map(|j| format!("- {}: {}", j.title, j.description))
            .collect::<Vec<_>>()
            .join("\n");

        self.add_section(
            SectionName::Journeys,
            "The following journeys are currently relevant to the interaction:\n###\n{journeys}\n###",
            [("journeys", listed)],
        )
    }

    /// Few-shot examples, numbered from one
    pub fn add_exemplars(&mut self, shots: &[&str]) -> &mut Self {
        if shots.is_empty() {
            return self;
        }

        let listed = shots
            .iter()
            .enumerate()
            .map(|(i, shot)| format!("Example #{}: ###\n{}\n###", i + 1, shot.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");

        self.add_section(
            SectionName::Exemplars,
            "EXAMPLES\n-------------------\n{exemplars}",
            [("exemplars", listed)],
        )
    }

    /// Render every section in insertion order
    pub fn build(&self) -> String {
        let prompt = self
            .sections
            .iter()
            .map(|s| s.render().trim().to_string())
            .collect::<Vec<_>>()
            .join("\n\n");

        trace!(sections = self.sections.len(), length = prompt.len(), "Prompt built");
        prompt
    }
}

fn format_events(events: &[Event]) -> String {
    events
        .iter()
        .map(|e| match e.text() {
            Some(text) => format!("[{}] {}: {}", e.offset, e.source, text),
            None => format!("[{}] {} {:?}: {}", e.offset, e.source, e.kind, e.data),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::EventSource;

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let props = BTreeMap::from([("name".to_string(), "Ada".to_string())]);
        assert_eq!(
            render_template("{name} says {\"ok\": true} {missing}", &props),
            "Ada says {\"ok\": true} {missing}"
        );
    }

    #[test]
    fn test_empty_collections_add_no_section() {
        let mut builder = PromptBuilder::new();
        builder.add_glossary(&[]).add_context_variables(&[]).add_staged_events(&[]);
        assert!(builder.sections().is_empty());
    }

    #[test]
    fn test_empty_history_still_adds_section() {
        let mut builder = PromptBuilder::new();
        builder.add_interaction_history(&[]);
        assert!(builder.has_section(&SectionName::InteractionHistory));
        assert!(builder.build().contains("just begun"));
    }

    #[test]
    fn test_exemplars_are_numbered() {
        let mut builder = PromptBuilder::new();
        builder.add_exemplars(&["first {\"applies\": true}", "second"]);
        let prompt = builder.build();
        assert!(prompt.contains("Example #1: ###\nfirst {\"applies\": true}"));
        assert!(prompt.contains("Example #2: ###\nsecond"));
    }

    #[test]
    fn test_build_joins_sections_in_order() {
        let mut builder = PromptBuilder::new();
        builder
            .add_agent_identity(&Agent::new("Sage"))
            .add_interaction_history(&[
                Event::message(EventSource::Customer, 0, "hello"),
                Event::message(EventSource::AiAgent, 1, "hi, how can I help?"),
            ]);

        let prompt = builder.build();
        let identity = prompt.find("named Sage").unwrap();
        let history = prompt.find("[0] customer: hello").unwrap();
        assert!(identity < history);
        assert!(prompt.contains("[1] agent: hi, how can I help?"));
    }
}
