//! Journeys: scripted multi-step flows modeled as step graphs

mod steps;
mod store;
mod types;

pub use steps::{JourneyStep, JourneyStepGraph};
pub use store::{InMemoryJourneyStore, JourneyStore};
pub use types::Journey;

use crate::error::Result;
use crate::guidelines::Guideline;

impl Journey {
    /// Check that `step_guidelines` form a valid step graph for this journey
    pub fn validate(&self, step_guidelines: &[Guideline]) -> Result<()> {
        JourneyStepGraph::build(self, step_guidelines).map(|_| ())
    }
}
