//! Guideline storage

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::types::Guideline;
use crate::error::{Error, Result};
use crate::ids::{GuidelineId, TagId};

/// Read access to guidelines needed by the matching pipeline
#[async_trait]
pub trait GuidelineStore: Send + Sync {
    /// Read one guideline, failing with `GuidelineNotFound` for unknown ids
    async fn read_guideline(&self, id: &GuidelineId) -> Result<Guideline>;

    /// List guidelines, optionally restricted to those carrying any of `tags`
    async fn list_guidelines(&self, tags: Option<&[TagId]>) -> Result<Vec<Guideline>>;
}

/// Guideline store backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryGuidelineStore {
    inner: RwLock<GuidelineTable>,
}

#[derive(Debug, Default)]
struct GuidelineTable {
    order: Vec<GuidelineId>,
    by_id: HashMap<GuidelineId, Guideline>,
}

impl InMemoryGuidelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a guideline after validating its annotations
    pub async fn upsert(&self, guideline: Guideline) -> Result<()> {
        guideline.validate()?;

        let mut table = self.inner.write().await;
        if !table.by_id.contains_key(&guideline.id) {
            table.order.push(guideline.id.clone());
        }
        table.by_id.insert(guideline.id.clone(), guideline);
        Ok(())
    }

    pub async fn remove(&self, id: &GuidelineId) -> Result<Guideline> {
        let mut table = self.inner.write().await;
        let removed = table
            .by_id
            .remove(id)
            .ok_or_else(|| Error::GuidelineNotFound(id.to_string()))?;
        table.order.retain(|existing| existing != id);
        Ok(removed)
    }
}

#[async_trait]
impl GuidelineStore for InMemoryGuidelineStore {
    async fn read_guideline(&self, id: &GuidelineId) -> Result<Guideline> {
        self.inner
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| Error::GuidelineNotFound(id.to_string()))
    }

    async fn list_guidelines(&self, tags: Option<&[TagId]>) -> Result<Vec<Guideline>> {
        let table = self.inner.read().await;
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .filter(|g| match tags {
                Some(tags) => tags.iter().any(|t| g.has_tag(t)),
                None => true,
            })
            .cloned()
            .collect())
    }
}
