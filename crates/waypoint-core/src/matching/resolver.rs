//! Strategy resolution with per-guideline and per-tag overrides

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::strategy::{GuidelineMatchingStrategy, GuidelineMatchingStrategyResolver};
use crate::guidelines::Guideline;
use crate::ids::{GuidelineId, TagId};

/// Resolves guideline overrides first, then tag overrides, then the generic strategy
pub struct GenericStrategyResolver {
    generic: Arc<dyn GuidelineMatchingStrategy>,
    guideline_overrides: HashMap<GuidelineId, Arc<dyn GuidelineMatchingStrategy>>,
    /// In registration order; the first tag a guideline carries wins
    tag_overrides: Vec<(TagId, Arc<dyn GuidelineMatchingStrategy>)>,
}

impl GenericStrategyResolver {
    pub fn new(generic: Arc<dyn GuidelineMatchingStrategy>) -> Self {
        Self {
            generic,
            guideline_overrides: HashMap::new(),
            tag_overrides: Vec::new(),
        }
    }

    pub fn with_guideline_override(
        mut self,
        guideline_id: impl Into<GuidelineId>,
        strategy: Arc<dyn GuidelineMatchingStrategy>,
    ) -> Self {
        self.guideline_overrides.insert(guideline_id.into(), strategy);
        self
    }

    /// Registering the same tag again replaces its strategy in place
    pub fn with_tag_override(
        mut self,
        tag: impl Into<TagId>,
        strategy: Arc<dyn GuidelineMatchingStrategy>,
    ) -> Self {
        let tag = tag.into();
        match self.tag_overrides.iter_mut().find(|(t, _)| *t == tag) {
            Some(entry) => entry.1 = strategy,
            None => self.tag_overrides.push((tag, strategy)),
        }
        self
    }
}

impl GuidelineMatchingStrategyResolver for GenericStrategyResolver {
    fn resolve(&self, guideline: &Guideline) -> Arc<dyn GuidelineMatchingStrategy> {
        if let Some(strategy) = self.guideline_overrides.get(&guideline.id) {
            return strategy.clone();
        }

        let mut candidates = self
            .tag_overrides
            .iter()
            .filter(|(tag, _)| guideline.has_tag(tag));

        if let Some((tag, strategy)) = candidates.next() {
            let others: Vec<&str> = candidates.map(|(t, _)| t.as_str()).collect();
            if !others.is_empty() {
                warn!(
                    guideline_id = %guideline.id,
                    chosen = %tag,
                    ignored = ?others,
                    "Multiple tag overrides apply; using the first registered"
                );
            }
            return strategy.clone();
        }

        self.generic.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::guidelines::GuidelineMatch;
    use crate::matching::batch::{GuidelineMatchingBatch, ResponseAnalysisBatch};
    use crate::matching::context::{ReportAnalysisContext, StrategyContext};
    use crate::matching::strategy::StrategyKind;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl GuidelineMatchingStrategy for Named {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Custom(self.0)
        }

        async fn create_matching_batches(
            &self,
            _guidelines: &[Guideline],
            _context: Arc<StrategyContext>,
        ) -> Result<Vec<Box<dyn GuidelineMatchingBatch>>> {
            Ok(Vec::new())
        }

        async fn create_response_analysis_batches(
            &self,
            _matches: &[GuidelineMatch],
            _context: Arc<ReportAnalysisContext>,
        ) -> Result<Vec<Box<dyn ResponseAnalysisBatch>>> {
            Ok(Vec::new())
        }
    }

    fn resolver() -> GenericStrategyResolver {
        GenericStrategyResolver::new(Arc::new(Named("generic")))
            .with_tag_override("vip", Arc::new(Named("vip")))
            .with_tag_override("billing", Arc::new(Named("billing")))
            .with_guideline_override("g1", Arc::new(Named("pinned")))
    }

    fn kind_of(resolver: &GenericStrategyResolver, guideline: &Guideline) -> StrategyKind {
        resolver.resolve(guideline).kind()
    }

    #[test]
    fn test_guideline_override_beats_tag_override() {
        let r = resolver();
        let g = Guideline::observational("x")
            .with_id("g1")
            .with_tags(vec!["vip".into(), "billing".into()]);
        assert_eq!(kind_of(&r, &g), StrategyKind::Custom("pinned"));
    }

    #[test]
    fn test_first_registered_tag_wins() {
        let r = resolver();
        let g = Guideline::observational("x").with_tags(vec!["billing".into(), "vip".into()]);
        assert_eq!(kind_of(&r, &g), StrategyKind::Custom("vip"));
    }

    #[test]
    fn test_falls_back_to_generic() {
        let r = resolver();
        let g = Guideline::observational("x").with_tags(vec!["other".into()]);
        assert_eq!(kind_of(&r, &g), StrategyKind::Custom("generic"));
    }

    #[test]
    fn test_reregistering_tag_keeps_position() {
        let r = resolver().with_tag_override("vip", Arc::new(Named("vip2")));
        let g = Guideline::observational("x").with_tags(vec!["billing".into(), "vip".into()]);
        assert_eq!(kind_of(&r, &g), StrategyKind::Custom("vip2"));
    }
}
