//! Relationship storage with a lazily built graph index

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::graph::{RelationshipGraph, TraversalDirection};
use super::types::{Relationship, RelationshipEntity, RelationshipKind};
use crate::error::{Error, Result};
use crate::ids::RelationshipId;

/// Persistence interface for relationships
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    // ========== Mutations ==========

    /// Create a relationship, returning the existing one if the same
    /// (source, target, kind) triple is already stored
    async fn create_relationship(
        &self,
        source: RelationshipEntity,
        target: RelationshipEntity,
        kind: RelationshipKind,
    ) -> Result<Relationship>;

    async fn delete_relationship(&self, id: &RelationshipId) -> Result<()>;

    // ========== Queries ==========

    async fn read_relationship(&self, id: &RelationshipId) -> Result<Relationship>;

    /// List relationships of `kind` touching exactly one given endpoint
    ///
    /// With `indirect`, every relationship reachable by walking the graph
    /// from the endpoint is returned. Passing neither or both endpoints is a
    /// programming error and panics.
    async fn list_relationships(
        &self,
        kind: RelationshipKind,
        indirect: bool,
        source: Option<&RelationshipEntity>,
        target: Option<&RelationshipEntity>,
    ) -> Result<Vec<Relationship>>;
}

/// Callback notified when the graph index of a kind changes or is dropped
pub type InvalidationHook = Arc<dyn Fn(RelationshipKind) + Send + Sync>;

/// Per-kind graph indexes, built on first query
#[derive(Debug, Default)]
pub struct GraphCache {
    graphs: HashMap<RelationshipKind, RelationshipGraph>,
}

impl GraphCache {
    pub fn get(&self, kind: RelationshipKind) -> Option<&RelationshipGraph> {
        self.graphs.get(&kind)
    }

    pub fn is_built(&self, kind: RelationshipKind) -> bool {
        self.graphs.contains_key(&kind)
    }

    fn ensure<'a>(
        &mut self,
        kind: RelationshipKind,
        relationships: impl IntoIterator<Item = &'a Relationship>,
    ) {
        self.graphs.entry(kind).or_insert_with(|| {
            debug!(kind = %kind, "Building relationship graph index");
            RelationshipGraph::build(kind, relationships)
        });
    }

    fn on_created(&mut self, relationship: &Relationship) {
        if let Some(graph) = self.graphs.get_mut(&relationship.kind) {
            graph.add(relationship);
        }
    }

    fn on_deleted(&mut self, relationship: &Relationship) {
        if let Some(graph) = self.graphs.get_mut(&relationship.kind) {
            graph.remove(relationship);
        }
    }

    /// Drop the index for `kind`, or every index when `None`
    pub fn invalidate(&mut self, kind: Option<RelationshipKind>) {
        match kind {
            Some(kind) => {
                self.graphs.remove(&kind);
            }
            None => self.graphs.clear(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    order: Vec<RelationshipId>,
    by_id: HashMap<RelationshipId, Relationship>,
    graphs: GraphCache,
}

impl StoreState {
    fn resolve(&self, ids: Vec<RelationshipId>) -> Vec<Relationship> {
        ids.into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect()
    }
}

/// Relationship store backed by process memory
///
/// Writes take the state lock exclusively; queries share it, so a graph
/// walk never observes a half-applied mutation.
#[derive(Default)]
pub struct InMemoryRelationshipStore {
    state: RwLock<StoreState>,
    hooks: Vec<InvalidationHook>,
}

impl fmt::Debug for InMemoryRelationshipStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRelationshipStore")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl InMemoryRelationshipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback fired after relationships of a kind change
    pub fn with_invalidation_hook(mut self, hook: InvalidationHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Drop cached graph indexes so the next query rebuilds them
    pub async fn invalidate(&self, kind: Option<RelationshipKind>) {
        self.state.write().await.graphs.invalidate(kind);

        match kind {
            Some(kind) => self.notify(kind),
            None => RelationshipKind::all().iter().for_each(|k| self.notify(*k)),
        }
    }

    pub async fn is_graph_built(&self, kind: RelationshipKind) -> bool {
        self.state.read().await.graphs.is_built(kind)
    }

    /// Every stored relationship, optionally of one kind, in creation order
    pub async fn all_relationships(&self, kind: Option<RelationshipKind>) -> Vec<Relationship> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .cloned()
            .collect()
    }

    fn notify(&self, kind: RelationshipKind) {
        for hook in &self.hooks {
            hook(kind);
        }
    }

    fn query(
        state: &StoreState,
        kind: RelationshipKind,
        indirect: bool,
        node: &RelationshipEntity,
        direction: TraversalDirection,
    ) -> Vec<Relationship> {
        let Some(graph) = state.graphs.get(kind) else {
            return Vec::new();
        };

        let ids = if indirect {
            graph.reachable(node, direction)
        } else {
            graph.direct(node, direction)
        };

        state.resolve(ids)
    }
}

#[async_trait]
impl RelationshipStore for InMemoryRelationshipStore {
    async fn create_relationship(
        &self,
        source: RelationshipEntity,
        target: RelationshipEntity,
        kind: RelationshipKind,
    ) -> Result<Relationship> {
        let relationship = {
            let mut state = self.state.write().await;

            if let Some(existing) = state
                .by_id
                .values()
                .find(|r| r.kind == kind && r.connects(&source, &target))
            {
                return Ok(existing.clone());
            }

            let relationship = Relationship::new(source, target, kind);
            state.order.push(relationship.id.clone());
            state
                .by_id
                .insert(relationship.id.clone(), relationship.clone());
            state.graphs.on_created(&relationship);
            relationship
        };

        debug!(
            id = %relationship.id,
            kind = %kind,
            source = %relationship.source,
            target = %relationship.target,
            "Relationship created"
        );
        self.notify(kind);

        Ok(relationship)
    }

    async fn delete_relationship(&self, id: &RelationshipId) -> Result<()> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state
                .by_id
                .remove(id)
                .ok_or_else(|| Error::RelationshipNotFound(id.to_string()))?;
            state.order.retain(|existing| existing != id);
            state.graphs.on_deleted(&removed);
            removed
        };

        debug!(id = %id, kind = %removed.kind, "Relationship deleted");
        self.notify(removed.kind);

        Ok(())
    }

    async fn read_relationship(&self, id: &RelationshipId) -> Result<Relationship> {
        self.state
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| Error::RelationshipNotFound(id.to_string()))
    }

    async fn list_relationships(
        &self,
        kind: RelationshipKind,
        indirect: bool,
        source: Option<&RelationshipEntity>,
        target: Option<&RelationshipEntity>,
    ) -> Result<Vec<Relationship>> {
        let (node, direction) = match (source, target) {
            (Some(source), None) => (source, TraversalDirection::Outgoing),
            (None, Some(target)) => (target, TraversalDirection::Incoming),
            _ => panic!("exactly one of `source` or `target` must be provided"),
        };

        {
            let state = self.state.read().await;
            if state.graphs.is_built(kind) {
                return Ok(Self::query(&state, kind, indirect, node, direction));
            }
        }

        let mut state = self.state.write().await;
        {
            let StoreState {
                order,
                by_id,
                graphs,
            } = &mut *state;
            graphs.ensure(kind, order.iter().filter_map(|id| by_id.get(id)));
        }
        let state = state.downgrade();

        Ok(Self::query(&state, kind, indirect, node, direction))
    }
}
