//! Oracle integration
//!
//! This module provides:
//! - The `SchematicGenerator` trait every matching batch calls
//! - Generation bookkeeping (duration, model, token usage)
//! - Adapters for JSON-producing text backends and bounded waits

mod adapters;
mod generation;

pub use adapters::{CompletionBackend, JsonSchematicGenerator, RawCompletion, TimeoutGenerator};
pub use generation::{
    GenerationHints, GenerationInfo, Schema, SchematicGenerationResult, SchematicGenerator,
    UsageInfo, parse_schematic,
};
