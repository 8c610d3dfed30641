//! Immutable per-cycle context bundles handed to strategies and batches

use std::sync::Arc;

use crate::entities::{Agent, Capability, ContextVariable, Customer, GlossaryTerm};
use crate::journeys::Journey;
use crate::prompt::PromptBuilder;
use crate::sessions::{Event, Session};

/// Everything a strategy needs to know about the current turn
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub agent: Agent,
    pub session: Session,
    pub customer: Customer,
    pub context_variables: Vec<ContextVariable>,
    pub interaction_history: Vec<Event>,
    pub terms: Vec<GlossaryTerm>,
    pub capabilities: Vec<Capability>,
    pub staged_events: Vec<Event>,
}

impl StrategyContext {
    pub fn new(agent: Agent, session: Session, customer: Customer) -> Self {
        Self {
            agent,
            session,
            customer,
            context_variables: Vec::new(),
            interaction_history: Vec::new(),
            terms: Vec::new(),
            capabilities: Vec::new(),
            staged_events: Vec::new(),
        }
    }

    pub fn with_context_variables(mut self, variables: Vec<ContextVariable>) -> Self {
        self.context_variables = variables;
        self
    }

    pub fn with_interaction_history(mut self, events: Vec<Event>) -> Self {
        self.interaction_history = events;
        self
    }

    pub fn with_terms(mut self, terms: Vec<GlossaryTerm>) -> Self {
        self.terms = terms;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_staged_events(mut self, events: Vec<Event>) -> Self {
        self.staged_events = events;
        self
    }

    /// Text of the most recent customer message, if any
    pub fn last_customer_message(&self) -> Option<&str> {
        self.interaction_history
            .iter()
            .rev()
            .find(|e| e.is_from_customer())
            .and_then(Event::text)
    }
}

/// Context of a single matching batch
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub strategy: Arc<StrategyContext>,
    /// Journeys the batch's guidelines are scoped to
    pub relevant_journeys: Vec<Journey>,
}

impl BatchContext {
    pub fn new(strategy: Arc<StrategyContext>, relevant_journeys: Vec<Journey>) -> Self {
        Self {
            strategy,
            relevant_journeys,
        }
    }

    /// Add the sections every matching prompt shares
    pub(crate) fn add_conversation_sections(&self, builder: &mut PromptBuilder) {
        let ctx = &self.strategy;
        builder
            .add_agent_identity(&ctx.agent)
            .add_customer_identity(&ctx.customer)
            .add_context_variables(&ctx.context_variables)
            .add_glossary(&ctx.terms)
            .add_capabilities(&ctx.capabilities)
            .add_journeys(&self.relevant_journeys)
            .add_interaction_history(&ctx.interaction_history)
            .add_staged_events(&ctx.staged_events);
    }
}

/// Context of a response analysis pass, taken after the reply is staged
#[derive(Debug, Clone)]
pub struct ReportAnalysisContext {
    pub agent: Agent,
    pub session: Session,
    pub customer: Customer,
    pub context_variables: Vec<ContextVariable>,
    pub interaction_history: Vec<Event>,
    pub terms: Vec<GlossaryTerm>,
    pub staged_events: Vec<Event>,
}

impl ReportAnalysisContext {
    pub(crate) fn add_conversation_sections(&self, builder: &mut PromptBuilder) {
        builder
            .add_agent_identity(&self.agent)
            .add_customer_identity(&self.customer)
            .add_context_variables(&self.context_variables)
            .add_glossary(&self.terms)
            .add_interaction_history(&self.interaction_history)
            .add_staged_events(&self.staged_events);
    }
}

impl From<&StrategyContext> for ReportAnalysisContext {
    fn from(ctx: &StrategyContext) -> Self {
        Self {
            agent: ctx.agent.clone(),
            session: ctx.session.clone(),
            customer: ctx.customer.clone(),
            context_variables: ctx.context_variables.clone(),
            interaction_history: ctx.interaction_history.clone(),
            terms: ctx.terms.clone(),
            staged_events: ctx.staged_events.clone(),
        }
    }
}
