//! Batch sizing and sampling-temperature policy

use std::sync::atomic::{AtomicUsize, Ordering};

/// Which temperature ladder a batch samples from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureHint {
    /// Ordinary applicability checks; temperature rises on each retry
    Matching,
    /// Disambiguation and journey step selection
    Precise,
}

/// Load-dependent tuning knobs consulted while building batches
pub trait OptimizationPolicy: Send + Sync {
    /// Number of batches a bucket of `guideline_count` guidelines is split into
    fn guideline_matching_batch_count(&self, guideline_count: usize) -> usize;

    /// Temperature per attempt; the last entry is reused once exhausted
    fn retry_temperatures(&self, hint: TemperatureHint) -> Vec<f32>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicOptimizationPolicy {
    limits: [usize; 3],
    max_batches: usize,
    temperatures: Vec<f32>,
    precise_temperature: f32,
}

impl Default for BasicOptimizationPolicy {
    fn default() -> Self {
        Self {
            limits: [10, 20, 30],
            max_batches: 5,
            temperatures: vec![0.1, 0.3, 0.5],
            precise_temperature: 0.15,
        }
    }
}

impl BasicOptimizationPolicy {
    /// `limits` are the inclusive upper bounds for one, two and three batches
    pub fn new(limits: [usize; 3], max_batches: usize) -> Self {
        Self {
            limits,
            max_batches,
            ..Self::default()
        }
    }

    pub fn with_temperatures(mut self, temperatures: Vec<f32>, precise_temperature: f32) -> Self {
        self.temperatures = temperatures;
        self.precise_temperature = precise_temperature;
        self
    }
}

impl OptimizationPolicy for BasicOptimizationPolicy {
    fn guideline_matching_batch_count(&self, guideline_count: usize) -> usize {
        let [single, double, triple] = self.limits;
        if guideline_count <= single {
            1
        } else if guideline_count <= double {
            2
        } else if guideline_count <= triple {
            3
        } else {
            self.max_batches
        }
    }

    fn retry_temperatures(&self, hint: TemperatureHint) -> Vec<f32> {
        match hint {
            TemperatureHint::Matching => self.temperatures.clone(),
            TemperatureHint::Precise => vec![self.precise_temperature],
        }
    }
}

/// Split `items` into at most `batch_count` contiguous chunks
///
/// Chunk sizes differ by at most one, earlier chunks taking the remainder.
/// Input order is preserved and no chunk is empty, so an empty input yields
/// no chunks at all.
pub fn partition<T: Clone>(items: &[T], batch_count: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let count = batch_count.clamp(1, items.len());
    let base = items.len() / count;
    let remainder = items.len() % count;

    let mut chunks = Vec::with_capacity(count);
    let mut start = 0;
    for index in 0..count {
        let len = base + usize::from(index < remainder);
        chunks.push(items[start..start + len].to_vec());
        start += len;
    }
    chunks
}

/// Per-batch temperature ladder advanced on every attempt
///
/// A batch is processed again after a retryable failure, so each call to
/// `next` hands out the following rung.
#[derive(Debug)]
pub struct TemperatureLadder {
    temperatures: Vec<f32>,
    attempts: AtomicUsize,
}

const FALLBACK_TEMPERATURE: f32 = 0.1;

impl TemperatureLadder {
    pub fn new(temperatures: Vec<f32>) -> Self {
        Self {
            temperatures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn from_policy(policy: &dyn OptimizationPolicy, hint: TemperatureHint) -> Self {
        Self::new(policy.retry_temperatures(hint))
    }

    pub fn next(&self) -> f32 {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        self.temperatures
            .get(attempt)
            .or_else(|| self.temperatures.last())
            .copied()
            .unwrap_or(FALLBACK_TEMPERATURE)
    }
}
