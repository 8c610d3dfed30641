//! Journey storage

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::types::Journey;
use crate::error::{Error, Result};
use crate::ids::JourneyId;

#[async_trait]
pub trait JourneyStore: Send + Sync {
    async fn read_journey(&self, id: &JourneyId) -> Result<Journey>;

    async fn list_journeys(&self) -> Result<Vec<Journey>>;
}

/// Journey store backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryJourneyStore {
    inner: RwLock<JourneyTable>,
}

#[derive(Debug, Default)]
struct JourneyTable {
    order: Vec<JourneyId>,
    by_id: HashMap<JourneyId, Journey>,
}

impl InMemoryJourneyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, journey: Journey) {
        let mut table = self.inner.write().await;
        if !table.by_id.contains_key(&journey.id) {
            table.order.push(journey.id.clone());
        }
        table.by_id.insert(journey.id.clone(), journey);
    }

    pub async fn delete(&self, id: &JourneyId) -> Result<()> {
        let mut table = self.inner.write().await;
        table
            .by_id
            .remove(id)
            .ok_or_else(|| Error::JourneyNotFound(id.to_string()))?;
        table.order.retain(|existing| existing != id);
        Ok(())
    }
}

#[async_trait]
impl JourneyStore for InMemoryJourneyStore {
    async fn read_journey(&self, id: &JourneyId) -> Result<Journey> {
        self.inner
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JourneyNotFound(id.to_string()))
    }

    async fn list_journeys(&self) -> Result<Vec<Journey>> {
        let table = self.inner.read().await;
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_and_delete() {
        let store = InMemoryJourneyStore::new();
        store.upsert(Journey::new("Onboarding").with_id("j1")).await;

        assert_eq!(store.read_journey(&"j1".into()).await.unwrap().title, "Onboarding");
        store.delete(&"j1".into()).await.unwrap();

        let err = store.read_journey(&"j1".into()).await.unwrap_err();
        assert!(matches!(err, Error::JourneyNotFound(_)));
        assert!(store.delete(&"j1".into()).await.is_err());
    }
}
