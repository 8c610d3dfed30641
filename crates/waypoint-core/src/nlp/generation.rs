//! Schema-constrained generation interface

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

use crate::error::{Error, Result};

/// A structured output the oracle is asked to produce
pub trait Schema: DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Name used in logs and validation errors
    const NAME: &'static str;
}

/// Sampling hints passed along with a prompt
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationHints {
    pub temperature: Option<f32>,
}

impl GenerationHints {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
        }
    }
}

/// Token usage reported by the oracle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl UsageInfo {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Bookkeeping for one oracle invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub schema_name: String,
    pub model: String,
    pub duration: Duration,
    pub usage: UsageInfo,
}

impl GenerationInfo {
    pub fn new(schema_name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            model: model.into(),
            duration: Duration::ZERO,
            usage: UsageInfo::default(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_usage(mut self, usage: UsageInfo) -> Self {
        self.usage = usage;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SchematicGenerationResult<T> {
    pub content: T,
    pub info: GenerationInfo,
}

/// The blackbox oracle: turns a prompt into a schema-validated value
///
/// Implementations fail with a retryable transport error
/// (`OracleUnavailable`, `RateLimited`, `OracleTimeout`) when the backend
/// misbehaves, and with `SchemaValidation` when its output does not parse.
#[async_trait]
pub trait SchematicGenerator<T: Schema>: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        hints: &GenerationHints,
    ) -> Result<SchematicGenerationResult<T>>;
}

/// Parse raw oracle output into `T`
///
/// Tolerates surrounding prose or code fences by reading from the first `{`
/// to the last `}`. Failures are logged with the raw content.
pub fn parse_schematic<T: Schema>(raw: &str) -> Result<T> {
    let body = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw,
    };

    serde_json::from_str(body).map_err(|e| {
        error!(
            schema = T::NAME,
            error = %e,
            raw = %raw,
            "Oracle output failed schema validation"
        );
        Error::SchemaValidation {
            schema: T::NAME.to_string(),
            message: e.to_string(),
            raw: raw.to_string(),
        }
    })
}
