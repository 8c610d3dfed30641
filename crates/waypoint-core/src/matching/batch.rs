//! Batch traits and their results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;
use crate::guidelines::{Guideline, GuidelineMatch};
use crate::ids::GuidelineId;
use crate::nlp::GenerationInfo;

/// One oracle invocation over a bounded set of guidelines of one category
#[async_trait]
pub trait GuidelineMatchingBatch: Send + Sync {
    /// Short label used in logs and retry errors
    fn name(&self) -> &str;

    /// Number of guidelines the batch evaluates
    fn size(&self) -> usize;

    async fn process(&self) -> Result<GuidelineMatchingBatchResult>;
}

#[derive(Debug, Clone)]
pub struct GuidelineMatchingBatchResult {
    pub matches: Vec<GuidelineMatch>,
    pub generation_info: GenerationInfo,
}

/// Aggregate outcome of a matching cycle
#[derive(Debug, Clone)]
pub struct GuidelineMatchingResult {
    pub total_duration: Duration,
    pub batch_count: usize,
    pub batch_generations: Vec<GenerationInfo>,
    /// Raw matches per batch, before any transform
    pub batches: Vec<Vec<GuidelineMatch>>,
    /// Final matches after every strategy's transform
    pub matches: Vec<GuidelineMatch>,
}

impl GuidelineMatchingResult {
    pub fn empty() -> Self {
        Self {
            total_duration: Duration::ZERO,
            batch_count: 0,
            batch_generations: Vec::new(),
            batches: Vec::new(),
            matches: Vec::new(),
        }
    }
}

/// Whether a matched guideline's action was carried out in the reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedGuideline {
    pub guideline: Guideline,
    pub is_previously_applied: bool,
}

#[async_trait]
pub trait ResponseAnalysisBatch: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self) -> Result<ResponseAnalysisBatchResult>;
}

#[derive(Debug, Clone)]
pub struct ResponseAnalysisBatchResult {
    pub analyzed_guidelines: Vec<AnalyzedGuideline>,
    pub generation_info: GenerationInfo,
}

#[derive(Debug, Clone)]
pub struct ResponseAnalysisResult {
    pub total_duration: Duration,
    pub batch_count: usize,
    pub batch_generations: Vec<GenerationInfo>,
    pub batches: Vec<Vec<AnalyzedGuideline>>,
}

impl ResponseAnalysisResult {
    pub fn empty() -> Self {
        Self {
            total_duration: Duration::ZERO,
            batch_count: 0,
            batch_generations: Vec::new(),
            batches: Vec::new(),
        }
    }

    pub fn analyzed_guidelines(&self) -> Vec<AnalyzedGuideline> {
        self.batches.iter().flatten().cloned().collect()
    }
}

/// Guidelines of a batch, deduplicated by id in first-seen order
#[derive(Debug, Clone, Default)]
pub(crate) struct GuidelineIndex {
    guidelines: Vec<Guideline>,
    positions: HashMap<GuidelineId, usize>,
}

impl GuidelineIndex {
    pub fn new(guidelines: impl IntoIterator<Item = Guideline>) -> Self {
        let mut index = Self::default();
        for guideline in guidelines {
            if !index.positions.contains_key(&guideline.id) {
                index
                    .positions
                    .insert(guideline.id.clone(), index.guidelines.len());
                index.guidelines.push(guideline);
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.guidelines.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Guideline> {
        self.guidelines.iter()
    }

    pub fn get(&self, id: &GuidelineId) -> Option<&Guideline> {
        self.positions.get(id).map(|&i| &self.guidelines[i])
    }

    /// Resolve an id echoed back by the oracle, logging unknown ones
    pub fn resolve(&self, batch: &str, id: &str) -> Option<&Guideline> {
        let found = self.get(&GuidelineId::from(id));
        if found.is_none() {
            warn!(batch = %batch, guideline_id = %id, "Oracle referenced a guideline outside the batch");
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_dedupes_in_first_seen_order() {
        let index = GuidelineIndex::new(vec![
            Guideline::observational("a").with_id("g1"),
            Guideline::observational("b").with_id("g2"),
            Guideline::observational("a again").with_id("g1"),
        ]);

        assert_eq!(index.len(), 2);
        let conditions: Vec<_> = index.iter().map(|g| g.content.condition.as_str()).collect();
        assert_eq!(conditions, vec!["a", "b"]);
        assert!(index.resolve("test", "g3").is_none());
    }
}
