//! Waypoint Core Library
//!
//! This crate provides the core functionality for Waypoint, including:
//! - Guidelines, journeys and the relationship graph between them
//! - Guideline matching (categorization, batching, strategies, retries)
//! - Post-match relational resolution (pull-in and priority)
//! - Response analysis of staged replies
//! - Oracle integration through structured generators
//! - Configuration with file persistence

pub mod config;
pub mod entities;
pub mod entity_queries;
pub mod error;
pub mod guidelines;
pub mod ids;
pub mod journeys;
pub mod matching;
pub mod nlp;
pub mod prompt;
pub mod relational;
pub mod relationships;
pub mod sessions;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::guidelines::{Guideline, GuidelineMatch, GuidelineStore, InMemoryGuidelineStore};
    pub use crate::journeys::{InMemoryJourneyStore, Journey, JourneyStore};
    pub use crate::matching::{
        GenericGuidelineMatchingStrategy, GenericStrategyResolver, GuidelineMatcher,
        StrategyContext,
    };
    pub use crate::relational::RelationalGuidelineResolver;
    pub use crate::relationships::{
        InMemoryRelationshipStore, RelationshipEntity, RelationshipKind, RelationshipStore,
    };
}
