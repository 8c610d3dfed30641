//! In-memory directed graph index over relationships of one kind

use std::collections::{HashMap, HashSet, VecDeque};

use super::types::{Relationship, RelationshipEntity, RelationshipKind};
use crate::ids::RelationshipId;

/// Direction in which to follow edges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    /// From source to target
    Outgoing,
    /// From target back to source
    Incoming,
}

#[derive(Debug, Clone)]
struct Edge {
    relationship: RelationshipId,
    peer: RelationshipEntity,
}

/// Adjacency index for a single relationship kind
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    outgoing: HashMap<RelationshipEntity, Vec<Edge>>,
    incoming: HashMap<RelationshipEntity, Vec<Edge>>,
    edge_count: usize,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from the relationships of `kind`, ignoring all others
    pub fn build<'a>(
        kind: RelationshipKind,
        relationships: impl IntoIterator<Item = &'a Relationship>,
    ) -> Self {
        let mut graph = Self::new();
        for relationship in relationships.into_iter().filter(|r| r.kind == kind) {
            graph.add(relationship);
        }
        graph
    }

    pub fn add(&mut self, relationship: &Relationship) {
        self.outgoing
            .entry(relationship.source.clone())
            .or_default()
            .push(Edge {
                relationship: relationship.id.clone(),
                peer: relationship.target.clone(),
            });
        self.incoming
            .entry(relationship.target.clone())
            .or_default()
            .push(Edge {
                relationship: relationship.id.clone(),
                peer: relationship.source.clone(),
            });
        self.edge_count += 1;
    }

    pub fn remove(&mut self, relationship: &Relationship) {
        if let Some(edges) = self.outgoing.get_mut(&relationship.source) {
            let len = edges.len();
            edges.retain(|e| e.relationship != relationship.id);
            if edges.len() < len {
                self.edge_count -= 1;
            }
        }
        if let Some(edges) = self.incoming.get_mut(&relationship.target) {
            edges.retain(|e| e.relationship != relationship.id);
        }
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    fn edges(&self, node: &RelationshipEntity, direction: TraversalDirection) -> &[Edge] {
        let map = match direction {
            TraversalDirection::Outgoing => &self.outgoing,
            TraversalDirection::Incoming => &self.incoming,
        };
        map.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids of the edges touching `node` in `direction`
    pub fn direct(
        &self,
        node: &RelationshipEntity,
        direction: TraversalDirection,
    ) -> Vec<RelationshipId> {
        self.edges(node, direction)
            .iter()
            .map(|e| e.relationship.clone())
            .collect()
    }

    /// Ids of every edge visited by a breadth-first walk from `node`
    ///
    /// Each edge is reported once, in BFS discovery order. Cycles terminate
    /// because nodes are only expanded once.
    pub fn reachable(
        &self,
        node: &RelationshipEntity,
        direction: TraversalDirection,
    ) -> Vec<RelationshipId> {
        let mut visited: HashSet<&RelationshipEntity> = HashSet::from([node]);
        let mut queue: VecDeque<&RelationshipEntity> = VecDeque::from([node]);
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            for edge in self.edges(current, direction) {
                result.push(edge.relationship.clone());
                if visited.insert(&edge.peer) {
                    queue.push_back(&edge.peer);
                }
            }
        }

        result
    }
}
