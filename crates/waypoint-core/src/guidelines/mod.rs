//! Guidelines and guideline matches
//!
//! A guideline pairs a natural-language condition with an optional action.
//! Guidelines without an action are observational: they signal that
//! something holds in the conversation but never instruct the agent.

mod annotations;
mod matches;
mod store;
mod types;

pub use annotations::{CustomerDependentAction, GuidelineAnnotations, JourneyStepLink};
pub use matches::{DisambiguationOutcome, GuidelineMatch, MAX_SCORE, MatchAnnotations, PreviouslyApplied};
pub use store::{GuidelineStore, InMemoryGuidelineStore};
pub use types::{Guideline, GuidelineContent, GuidelineRepresentation};
