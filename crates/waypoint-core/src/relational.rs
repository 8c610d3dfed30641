//! Post-match resolution over the relationship graph
//!
//! Two passes run over the matches of a cycle:
//!
//! 1. Pull-in: entailment and dependency edges leaving a matched guideline
//!    add their targets from the usable set, transitively.
//! 2. Priority: a match whose guideline reaches another matched guideline
//!    over priority edges is dropped, unless that guideline reaches it back.
//!
//! Walks run over guideline and tag nodes alike. Reaching a tag reaches every
//! known guideline carrying it, and a tag no guideline carries still passes
//! the walk on through its own outgoing edges.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::guidelines::{Guideline, GuidelineMatch};
use crate::ids::GuidelineId;
use crate::relationships::{RelationshipEntity, RelationshipKind, RelationshipStore};

const INFERRED_RATIONALE: &str = "Automatically inferred from context";

const PULL_IN_KINDS: [RelationshipKind; 2] = [RelationshipKind::Entailment, RelationshipKind::Dependency];

pub struct RelationalGuidelineResolver {
    store: Arc<dyn RelationshipStore>,
}

/// Guidelines known to the resolver, for tag expansion
struct Known<'a> {
    by_id: HashMap<&'a GuidelineId, &'a Guideline>,
    all: Vec<&'a Guideline>,
}

impl<'a> Known<'a> {
    fn new(guidelines: impl IntoIterator<Item = &'a Guideline>) -> Self {
        let mut known = Self {
            by_id: HashMap::new(),
            all: Vec::new(),
        };
        for guideline in guidelines {
            if known.by_id.insert(&guideline.id, guideline).is_none() {
                known.all.push(guideline);
            }
        }
        known
    }

    /// Nodes whose outgoing edges apply to `id`: itself and each of its tags
    fn sources(&self, id: &GuidelineId) -> Vec<RelationshipEntity> {
        let mut nodes = vec![RelationshipEntity::Guideline(id.clone())];
        if let Some(guideline) = self.by_id.get(id) {
            nodes.extend(guideline.tags.iter().cloned().map(RelationshipEntity::Tag));
        }
        nodes
    }

    /// Nodes entered when an edge lands on `target`
    ///
    /// A tag brings in every known guideline carrying it, along with the
    /// nodes those guidelines inherit edges from.
    fn entered(&self, target: &RelationshipEntity) -> Vec<RelationshipEntity> {
        match target {
            RelationshipEntity::Guideline(id) => self.sources(id),
            RelationshipEntity::Tag(tag) => {
                let mut nodes = vec![target.clone()];
                for guideline in self.all.iter().filter(|g| g.has_tag(tag)) {
                    nodes.extend(self.sources(&guideline.id));
                }
                nodes
            }
        }
    }
}

impl RelationalGuidelineResolver {
    pub fn new(store: Arc<dyn RelationshipStore>) -> Self {
        Self { store }
    }

    /// Every guideline reachable from `start` over edges of `kinds`, excluding `start`
    async fn closure(
        &self,
        known: &Known<'_>,
        start: &GuidelineId,
        kinds: &[RelationshipKind],
    ) -> Result<Vec<GuidelineId>> {
        let origin = RelationshipEntity::Guideline(start.clone());
        let mut queue: VecDeque<RelationshipEntity> = known.sources(start).into();
        let mut visited: HashSet<RelationshipEntity> = queue.iter().cloned().collect();
        let mut reached = Vec::new();

        while let Some(current) = queue.pop_front() {
            for kind in kinds {
                for relationship in self
                    .store
                    .list_relationships(*kind, false, Some(&current), None)
                    .await?
                {
                    for node in known.entered(&relationship.target) {
                        if node == origin || !visited.insert(node.clone()) {
                            continue;
                        }
                        if let RelationshipEntity::Guideline(id) = &node {
                            reached.push(id.clone());
                        }
                        queue.push_back(node);
                    }
                }
            }
        }

        Ok(reached)
    }

    /// Apply pull-in and priority relationships to `matches`
    ///
    /// `usable` is the set of guidelines under consideration this cycle; only
    /// they can be pulled in. Running the resolver on its own output changes
    /// nothing.
    pub async fn resolve(
        &self,
        usable: &[Guideline],
        matches: Vec<GuidelineMatch>,
    ) -> Result<Vec<GuidelineMatch>> {
        let matched_guidelines: Vec<Guideline> = matches.iter().map(|m| m.guideline.clone()).collect();
        let known = Known::new(usable.iter().chain(&matched_guidelines));
        let usable_ids: HashSet<&GuidelineId> = usable.iter().map(|g| &g.id).collect();

        let mut seen: HashSet<GuidelineId> = HashSet::new();
        let mut resolved: Vec<GuidelineMatch> = Vec::new();
        for m in matches {
            if seen.insert(m.guideline_id().clone()) {
                resolved.push(m);
            }
        }

        let mut pulled = Vec::new();
        for m in &resolved {
            for id in self.closure(&known, m.guideline_id(), &PULL_IN_KINDS).await? {
                if !usable_ids.contains(&id) || !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(guideline) = known.by_id.get(&id) {
                    debug!(source = %m.guideline_id(), pulled = %id, "Guideline pulled in");
                    pulled.push(GuidelineMatch::new((*guideline).clone(), m.score, INFERRED_RATIONALE));
                }
            }
        }
        resolved.extend(pulled);

        let matched: HashSet<GuidelineId> = resolved.iter().map(|m| m.guideline_id().clone()).collect();
        let mut reach: HashMap<GuidelineId, HashSet<GuidelineId>> = HashMap::new();
        for id in &matched {
            let reached = self
                .closure(&known, id, &[RelationshipKind::Priority])
                .await?
                .into_iter()
                .filter(|r| matched.contains(r))
                .collect();
            reach.insert(id.clone(), reached);
        }

        let before = resolved.len();
        resolved.retain(|m| match dominating(&reach, m.guideline_id()) {
            Some(winner) => {
                debug!(dropped = %m.guideline_id(), prioritized = %winner, "Match deprioritized");
                false
            }
            None => true,
        });

        debug!(
            before,
            after = resolved.len(),
            "Relational resolution finished"
        );

        Ok(resolved)
    }
}

/// A matched guideline `id` yields to, if any
///
/// A priority edge `A -> B` makes its source yield: with both matched, A is
/// dropped and B survives, so the end of a priority chain is what remains.
/// Guidelines reaching each other keep both.
fn dominating<'r>(
    reach: &'r HashMap<GuidelineId, HashSet<GuidelineId>>,
    id: &GuidelineId,
) -> Option<&'r GuidelineId> {
    reach.get(id)?.iter().find(|other| {
        reach
            .get(*other)
            .is_none_or(|back| !back.contains(id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::InMemoryRelationshipStore;

    fn guideline(id: &str) -> Guideline {
        Guideline::actionable(format!("when {}", id), format!("do {}", id)).with_id(id)
    }

    fn matched(g: &Guideline, score: u8) -> GuidelineMatch {
        GuidelineMatch::new(g.clone(), score, "matched")
    }

    fn ids(matches: &[GuidelineMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.guideline_id().as_str()).collect()
    }

    async fn relate(store: &InMemoryRelationshipStore, source: RelationshipEntity, target: RelationshipEntity, kind: RelationshipKind) {
        store.create_relationship(source, target, kind).await.unwrap();
    }

    fn g(id: &str) -> RelationshipEntity {
        RelationshipEntity::Guideline(id.into())
    }

    #[tokio::test]
    async fn test_priority_drops_source_and_keeps_target() {
        let store = Arc::new(InMemoryRelationshipStore::new());
        relate(&store, g("a"), g("b"), RelationshipKind::Priority).await;
        relate(&store, g("b"), g("c"), RelationshipKind::Priority).await;

        let (a, b, c) = (guideline("a"), guideline("b"), guideline("c"));
        let resolver = RelationalGuidelineResolver::new(store);
        let result = resolver
            .resolve(&[a.clone(), b.clone(), c.clone()], vec![matched(&a, 9), matched(&b, 9), matched(&c, 9)])
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["c"]);
    }

    #[tokio::test]
    async fn test_priority_through_unmatched_and_tag() {
        let store = Arc::new(InMemoryRelationshipStore::new());
        relate(&store, g("a"), g("x"), RelationshipKind::Priority).await;
        relate(&store, g("x"), RelationshipEntity::Tag("vip".into()), RelationshipKind::Priority).await;

        let a = guideline("a");
        let x = guideline("x");
        let v = guideline("v").with_tags(vec!["vip".into()]);
        let resolver = RelationalGuidelineResolver::new(store);
        let result = resolver
            .resolve(&[a.clone(), x, v.clone()], vec![matched(&a, 7), matched(&v, 7)])
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["v"]);
    }

    #[tokio::test]
    async fn test_priority_through_tag_nobody_carries() {
        let store = Arc::new(InMemoryRelationshipStore::new());
        relate(&store, g("a"), RelationshipEntity::Tag("t1".into()), RelationshipKind::Priority).await;
        relate(&store, RelationshipEntity::Tag("t1".into()), g("c"), RelationshipKind::Priority).await;

        let (a, c) = (guideline("a"), guideline("c"));
        let resolver = RelationalGuidelineResolver::new(store);
        let result = resolver
            .resolve(&[a.clone(), c.clone()], vec![matched(&a, 8), matched(&c, 8)])
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["c"]);
    }

    #[tokio::test]
    async fn test_entailment_through_tag_nobody_carries() {
        let store = Arc::new(InMemoryRelationshipStore::new());
        relate(&store, g("a"), RelationshipEntity::Tag("hop".into()), RelationshipKind::Entailment).await;
        relate(&store, RelationshipEntity::Tag("hop".into()), g("b"), RelationshipKind::Entailment).await;

        let (a, b) = (guideline("a"), guideline("b"));
        let resolver = RelationalGuidelineResolver::new(store);
        let result = resolver.resolve(&[a.clone(), b], vec![matched(&a, 6)]).await.unwrap();

        assert_eq!(ids(&result), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_edges_from_a_carried_tag_apply_to_its_guidelines() {
        let store = Arc::new(InMemoryRelationshipStore::new());
        relate(&store, g("a"), RelationshipEntity::Tag("vip".into()), RelationshipKind::Priority).await;
        relate(&store, RelationshipEntity::Tag("vip".into()), g("c"), RelationshipKind::Priority).await;

        let a = guideline("a");
        let v = guideline("v").with_tags(vec!["vip".into()]);
        let c = guideline("c");
        let resolver = RelationalGuidelineResolver::new(store);
        let result = resolver
            .resolve(
                &[a.clone(), v.clone(), c.clone()],
                vec![matched(&a, 8), matched(&v, 8), matched(&c, 8)],
            )
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["c"]);
    }

    #[tokio::test]
    async fn test_mutual_priority_keeps_both() {
        let store = Arc::new(InMemoryRelationshipStore::new());
        relate(&store, g("a"), g("b"), RelationshipKind::Priority).await;
        relate(&store, g("b"), g("a"), RelationshipKind::Priority).await;

        let (a, b) = (guideline("a"), guideline("b"));
        let resolver = RelationalGuidelineResolver::new(store);
        let result = resolver
            .resolve(&[a.clone(), b.clone()], vec![matched(&a, 5), matched(&b, 5)])
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_entailment_pulls_in_transitively() {
        let store = Arc::new(InMemoryRelationshipStore::new());
        relate(&store, g("a"), g("b"), RelationshipKind::Entailment).await;
        relate(&store, g("b"), g("c"), RelationshipKind::Dependency).await;
        relate(&store, g("a"), g("outside"), RelationshipKind::Entailment).await;

        let (a, b, c) = (guideline("a"), guideline("b"), guideline("c"));
        let resolver = RelationalGuidelineResolver::new(store);
        let result = resolver
            .resolve(&[a.clone(), b, c], vec![matched(&a, 6)])
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["a", "b", "c"]);
        assert_eq!(result[1].score, 6);
        assert_eq!(result[1].rationale, INFERRED_RATIONALE);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let store = Arc::new(InMemoryRelationshipStore::new());
        relate(&store, g("a"), g("b"), RelationshipKind::Entailment).await;
        relate(&store, g("b"), g("c"), RelationshipKind::Priority).await;
        relate(&store, g("d"), g("a"), RelationshipKind::Priority).await;

        let usable: Vec<Guideline> = ["a", "b", "c", "d"].into_iter().map(guideline).collect();
        let matches = vec![matched(&usable[0], 8), matched(&usable[2], 8), matched(&usable[3], 8)];
        let resolver = RelationalGuidelineResolver::new(store);

        let once = resolver.resolve(&usable, matches).await.unwrap();
        let twice = resolver.resolve(&usable, once.clone()).await.unwrap();

        assert_eq!(ids(&once), vec!["a", "c"]);
        assert_eq!(once, twice);
    }
}
