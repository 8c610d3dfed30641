//! Oracle adapters: text backends and timeouts

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::generation::{
    GenerationHints, GenerationInfo, Schema, SchematicGenerationResult, SchematicGenerator,
    UsageInfo, parse_schematic,
};
use crate::error::{Error, Result};

/// Raw text returned by a completion backend
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub text: String,
    pub model: String,
    pub usage: UsageInfo,
}

/// A text-completion service, such as an HTTP model API
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, hints: &GenerationHints) -> Result<RawCompletion>;
}

/// Schematic generator that asks a text backend for JSON and validates it
#[derive(Debug, Clone)]
pub struct JsonSchematicGenerator<B> {
    backend: B,
}

impl<B> JsonSchematicGenerator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<T, B> SchematicGenerator<T> for JsonSchematicGenerator<B>
where
    T: Schema,
    B: CompletionBackend,
{
    async fn generate(
        &self,
        prompt: &str,
        hints: &GenerationHints,
    ) -> Result<SchematicGenerationResult<T>> {
        let started = Instant::now();
        let completion = self.backend.complete(prompt, hints).await?;
        let content = parse_schematic::<T>(&completion.text)?;

        debug!(
            schema = T::NAME,
            model = %completion.model,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "Schematic generation complete"
        );

        Ok(SchematicGenerationResult {
            content,
            info: GenerationInfo::new(T::NAME, completion.model)
                .with_duration(started.elapsed())
                .with_usage(completion.usage),
        })
    }
}

/// Bounds every generation call by a fixed wait
///
/// An expired wait surfaces as `Error::OracleTimeout`, which the matcher's
/// retry policy treats as retryable.
#[derive(Debug, Clone)]
pub struct TimeoutGenerator<G> {
    inner: G,
    timeout: Duration,
}

impl<G> TimeoutGenerator<G> {
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<T, G> SchematicGenerator<T> for TimeoutGenerator<G>
where
    T: Schema,
    G: SchematicGenerator<T>,
{
    async fn generate(
        &self,
        prompt: &str,
        hints: &GenerationHints,
    ) -> Result<SchematicGenerationResult<T>> {
        let generation = SchematicGenerator::<T>::generate(&self.inner, prompt, hints);
        match tokio::time::timeout(self.timeout, generation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(schema = T::NAME, timeout_secs = self.timeout.as_secs(), "Generation timed out");
                Err(Error::OracleTimeout(self.timeout.as_secs()))
            }
        }
    }
}
