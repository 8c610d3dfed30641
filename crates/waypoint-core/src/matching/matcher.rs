//! Orchestrates a matching cycle across strategies

use futures_util::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::batch::{GuidelineMatchingResult, ResponseAnalysisResult};
use super::context::{ReportAnalysisContext, StrategyContext};
use super::retry::{RetryPolicy, execute_with_retry};
use super::strategy::{GuidelineMatchingStrategy, GuidelineMatchingStrategyResolver, StrategyKind};
use crate::error::Result;
use crate::guidelines::{Guideline, GuidelineMatch};

type Group<T> = (Arc<dyn GuidelineMatchingStrategy>, Vec<T>);

/// Runs every batch of a cycle concurrently and aggregates their matches
///
/// A batch that still fails after its retry budget aborts the whole cycle;
/// no partial result is returned.
pub struct GuidelineMatcher {
    resolver: Arc<dyn GuidelineMatchingStrategyResolver>,
    retry: RetryPolicy,
}

impl GuidelineMatcher {
    pub fn new(resolver: Arc<dyn GuidelineMatchingStrategyResolver>, retry: RetryPolicy) -> Self {
        Self { resolver, retry }
    }

    /// Group items by the kind of the strategy resolved for their guideline
    fn group<'a, T: Clone + 'a>(
        &self,
        items: impl IntoIterator<Item = &'a T>,
        guideline: impl Fn(&T) -> &Guideline,
    ) -> Vec<Group<T>> {
        let mut groups: Vec<Group<T>> = Vec::new();
        let mut index: HashMap<StrategyKind, usize> = HashMap::new();

        for item in items {
            let strategy = self.resolver.resolve(guideline(item));
            let position = *index.entry(strategy.kind()).or_insert_with(|| {
                groups.push((strategy, Vec::new()));
                groups.len() - 1
            });
            groups[position].1.push(item.clone());
        }

        groups
    }

    pub async fn match_guidelines(
        &self,
        context: Arc<StrategyContext>,
        guidelines: &[Guideline],
    ) -> Result<GuidelineMatchingResult> {
        if guidelines.is_empty() {
            return Ok(GuidelineMatchingResult::empty());
        }

        let started = Instant::now();
        let groups = self.group(guidelines, |g| g);

        info!(
            guidelines = guidelines.len(),
            strategies = groups.len(),
            "Matching cycle started"
        );

        let batches = try_join_all(
            groups
                .iter()
                .map(|(strategy, members)| strategy.create_matching_batches(members, context.clone())),
        )
        .await?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        debug!(batches = batches.len(), "Batches created");

        let results = try_join_all(batches.iter().map(|batch| {
            execute_with_retry(&self.retry, batch.name(), move |_| batch.process())
        }))
        .await?;

        let batch_generations = results.iter().map(|r| r.generation_info.clone()).collect();
        let batch_matches: Vec<Vec<GuidelineMatch>> =
            results.into_iter().map(|r| r.matches).collect();

        let mut matches: Vec<GuidelineMatch> = batch_matches.iter().flatten().cloned().collect();
        for (strategy, _) in &groups {
            matches = strategy.transform_matches(matches);
        }

        let total_duration = started.elapsed();
        info!(
            batches = batches.len(),
            matches = matches.len(),
            duration_ms = total_duration.as_millis() as u64,
            "Matching cycle finished"
        );

        Ok(GuidelineMatchingResult {
            total_duration,
            batch_count: batches.len(),
            batch_generations,
            batches: batch_matches,
            matches,
        })
    }

    /// Decide which matched guidelines the staged reply already applied
    pub async fn analyze_response(
        &self,
        context: Arc<ReportAnalysisContext>,
        matches: &[GuidelineMatch],
    ) -> Result<ResponseAnalysisResult> {
        if matches.is_empty() {
            return Ok(ResponseAnalysisResult::empty());
        }

        let started = Instant::now();
        let groups = self.group(matches, |m| &m.guideline);

        info!(matches = matches.len(), strategies = groups.len(), "Response analysis started");

        let batches = try_join_all(groups.iter().map(|(strategy, members)| {
            strategy.create_response_analysis_batches(members, context.clone())
        }))
        .await?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        let results = try_join_all(batches.iter().map(|batch| {
            execute_with_retry(&self.retry, batch.name(), move |_| batch.process())
        }))
        .await?;

        let batch_generations = results.iter().map(|r| r.generation_info.clone()).collect();
        let analyzed: Vec<_> = results.into_iter().map(|r| r.analyzed_guidelines).collect();

        let total_duration = started.elapsed();
        info!(
            batches = batches.len(),
            analyzed = analyzed.iter().map(Vec::len).sum::<usize>(),
            duration_ms = total_duration.as_millis() as u64,
            "Response analysis finished"
        );

        Ok(ResponseAnalysisResult {
            total_duration,
            batch_count: batches.len(),
            batch_generations,
            batches: analyzed,
        })
    }
}
