//! Relationship graph between guidelines and tags
//!
//! Relationships are typed directed edges. Either endpoint may be a single
//! guideline or a tag, in which case the edge applies to every guideline
//! carrying that tag.
//!
//! ```text
//! ┌────────────┐ priority  ┌────────────┐
//! │ guideline  │──────────▶│    tag     │──▶ every guideline tagged
//! └────────────┘           └────────────┘
//! ```
//!
//! Each kind gets its own graph index inside the store, built on the first
//! query and then updated incrementally.

mod graph;
mod store;
mod types;

pub use graph::{RelationshipGraph, TraversalDirection};
pub use store::{GraphCache, InMemoryRelationshipStore, InvalidationHook, RelationshipStore};
pub use types::{EntityKind, Relationship, RelationshipEntity, RelationshipKind};
