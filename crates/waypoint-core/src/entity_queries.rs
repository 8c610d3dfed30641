//! Cross-store queries used while building matching batches

use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::guidelines::{Guideline, GuidelineStore};
use crate::ids::GuidelineId;
use crate::journeys::{Journey, JourneyStore};
use crate::relationships::{InvalidationHook, RelationshipEntity, RelationshipKind, RelationshipStore};

/// Sizing of the guideline-to-journeys cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JourneyCacheSettings {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for JourneyCacheSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(120),
        }
    }
}

/// Counter bumped whenever dependency relationships change
///
/// Hand [`CacheGeneration::hook`] to the relationship store and the same
/// generation to [`EntityQueries::with_generation`]; cached journey scoping
/// is then dropped on the first lookup after a change.
#[derive(Debug, Clone, Default)]
pub struct CacheGeneration(Arc<AtomicU64>);

impl CacheGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn hook(&self) -> InvalidationHook {
        let generation = self.clone();
        Arc::new(move |kind| {
            if kind == RelationshipKind::Dependency {
                generation.bump();
            }
        })
    }
}

pub struct EntityQueries {
    journeys: Arc<dyn JourneyStore>,
    guidelines: Arc<dyn GuidelineStore>,
    relationships: Arc<dyn RelationshipStore>,
    generation: CacheGeneration,
    /// Generation the cached entries were computed under
    cached_generation: AtomicU64,
    cache: Cache<GuidelineId, Vec<Journey>>,
}

impl EntityQueries {
    pub fn new(
        journeys: Arc<dyn JourneyStore>,
        guidelines: Arc<dyn GuidelineStore>,
        relationships: Arc<dyn RelationshipStore>,
        settings: JourneyCacheSettings,
    ) -> Self {
        Self {
            journeys,
            guidelines,
            relationships,
            generation: CacheGeneration::new(),
            cached_generation: AtomicU64::new(0),
            cache: Cache::builder()
                .max_capacity(settings.capacity as u64)
                .time_to_live(settings.ttl)
                .build(),
        }
    }

    pub fn with_generation(mut self, generation: CacheGeneration) -> Self {
        self.cached_generation = AtomicU64::new(generation.current());
        self.generation = generation;
        self
    }

    /// Hook that marks cached results stale when dependencies change
    pub fn invalidation_hook(&self) -> InvalidationHook {
        self.generation.hook()
    }

    /// Drop every cached result
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    /// Journeys whose tag `guideline_id` depends on, directly or transitively
    pub async fn find_journeys_on_which_this_guideline_depends(
        &self,
        guideline_id: &GuidelineId,
    ) -> Result<Vec<Journey>> {
        let current = self.generation.current();
        if self.cached_generation.swap(current, Ordering::AcqRel) != current {
            debug!(generation = current, "Dependency relationships changed, dropping journey cache");
            self.cache.invalidate_all();
        }

        if let Some(journeys) = self.cache.get(guideline_id).await {
            return Ok(journeys);
        }

        let mut index = self.build_dependency_index().await?;
        let found = index.remove(guideline_id).unwrap_or_default();

        debug!(
            guideline_id = %guideline_id,
            journeys = found.len(),
            indexed = index.len() + 1,
            "Journey dependency index rebuilt"
        );

        // A change during the rebuild leaves the index stale
        if self.generation.current() == current {
            for (id, journeys) in index {
                self.cache.insert(id, journeys).await;
            }
            self.cache.insert(guideline_id.clone(), found.clone()).await;
        }

        Ok(found)
    }

    /// Guidelines stored under `ids`, skipping ids that are no longer stored
    pub async fn find_guidelines(&self, ids: &[GuidelineId]) -> Result<Vec<Guideline>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match self.guidelines.read_guideline(id).await {
                Ok(guideline) => found.push(guideline),
                Err(Error::GuidelineNotFound(_)) => {
                    debug!(guideline_id = %id, "Referenced guideline is not stored");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    async fn build_dependency_index(&self) -> Result<HashMap<GuidelineId, Vec<Journey>>> {
        let mut index: HashMap<GuidelineId, Vec<Journey>> = HashMap::new();

        for journey in self.journeys.list_journeys().await? {
            let tag = RelationshipEntity::Tag(journey.tag());
            let relationships = self
                .relationships
                .list_relationships(RelationshipKind::Dependency, true, None, Some(&tag))
                .await?;

            let mut dependents = Vec::new();
            for relationship in relationships {
                match relationship.source {
                    RelationshipEntity::Guideline(id) => dependents.push(id),
                    RelationshipEntity::Tag(tag) => dependents.extend(
                        self.guidelines
                            .list_guidelines(Some(std::slice::from_ref(&tag)))
                            .await?
                            .into_iter()
                            .map(|g| g.id),
                    ),
                }
            }

            for id in dependents {
                let journeys = index.entry(id).or_default();
                if !journeys.iter().any(|j| j.id == journey.id) {
                    journeys.push(journey.clone());
                }
            }
        }

        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidelines::{Guideline, InMemoryGuidelineStore};
    use crate::journeys::InMemoryJourneyStore;
    use crate::relationships::InMemoryRelationshipStore;

    struct Fixture {
        queries: EntityQueries,
        relationships: Arc<InMemoryRelationshipStore>,
        journey: Journey,
    }

    async fn fixture() -> Fixture {
        let generation = CacheGeneration::new();
        let guidelines = Arc::new(InMemoryGuidelineStore::new());
        let journeys = Arc::new(InMemoryJourneyStore::new());
        let relationships =
            Arc::new(InMemoryRelationshipStore::new().with_invalidation_hook(generation.hook()));

        guidelines
            .upsert(Guideline::observational("tagged").with_id("t1").with_tags(vec!["billing".into()]))
            .await
            .unwrap();
        let journey = Journey::new("Refund").with_id("refund");
        journeys.upsert(journey.clone()).await;

        let queries = EntityQueries::new(
            journeys,
            guidelines,
            relationships.clone(),
            JourneyCacheSettings::default(),
        )
        .with_generation(generation);

        Fixture {
            queries,
            relationships,
            journey,
        }
    }

    #[tokio::test]
    async fn test_direct_transitive_and_tag_dependencies() {
        let f = fixture().await;
        let journey_tag = RelationshipEntity::Tag(f.journey.tag());
        f.relationships
            .create_relationship(
                RelationshipEntity::Guideline("g1".into()),
                journey_tag.clone(),
                RelationshipKind::Dependency,
            )
            .await
            .unwrap();
        f.relationships
            .create_relationship(
                RelationshipEntity::Guideline("g2".into()),
                RelationshipEntity::Guideline("g1".into()),
                RelationshipKind::Dependency,
            )
            .await
            .unwrap();
        f.relationships
            .create_relationship(
                RelationshipEntity::Tag("billing".into()),
                journey_tag,
                RelationshipKind::Dependency,
            )
            .await
            .unwrap();

        for id in ["g1", "g2", "t1"] {
            let journeys = f
                .queries
                .find_journeys_on_which_this_guideline_depends(&id.into())
                .await
                .unwrap();
            assert_eq!(journeys.len(), 1, "{} should depend on the journey", id);
            assert_eq!(journeys[0].id, f.journey.id);
        }

        let none = f
            .queries
            .find_journeys_on_which_this_guideline_depends(&"unrelated".into())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_dependency_change_invalidates_cached_miss() {
        let f = fixture().await;
        let id = GuidelineId::from("g1");

        assert!(f.queries.find_journeys_on_which_this_guideline_depends(&id).await.unwrap().is_empty());

        f.relationships
            .create_relationship(
                RelationshipEntity::Guideline(id.clone()),
                RelationshipEntity::Tag(f.journey.tag()),
                RelationshipKind::Dependency,
            )
            .await
            .unwrap();

        let journeys = f.queries.find_journeys_on_which_this_guideline_depends(&id).await.unwrap();
        assert_eq!(journeys.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_entries_expire_after_ttl() {
        let guidelines = Arc::new(InMemoryGuidelineStore::new());
        let journeys = Arc::new(InMemoryJourneyStore::new());
        let relationships = Arc::new(InMemoryRelationshipStore::new());
        let journey = Journey::new("Refund").with_id("refund");
        journeys.upsert(journey.clone()).await;

        let queries = EntityQueries::new(
            journeys,
            guidelines,
            relationships.clone(),
            JourneyCacheSettings {
                capacity: 16,
                ttl: Duration::from_millis(50),
            },
        );
        let id = GuidelineId::from("g1");

        assert!(queries.find_journeys_on_which_this_guideline_depends(&id).await.unwrap().is_empty());

        // No invalidation hook: only expiry makes the new edge visible
        relationships
            .create_relationship(
                RelationshipEntity::Guideline(id.clone()),
                RelationshipEntity::Tag(journey.tag()),
                RelationshipKind::Dependency,
            )
            .await
            .unwrap();
        assert!(queries.find_journeys_on_which_this_guideline_depends(&id).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let found = queries.find_journeys_on_which_this_guideline_depends(&id).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_drops_cached_results() {
        let f = fixture().await;
        let id = GuidelineId::from("g1");
        assert!(f.queries.find_journeys_on_which_this_guideline_depends(&id).await.unwrap().is_empty());
        assert!(f.queries.cache.get(&id).await.is_some());

        f.queries.invalidate();

        assert!(f.queries.cache.get(&id).await.is_none());
    }
}
