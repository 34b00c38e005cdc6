use async_trait::async_trait;
use tokio::sync::Mutex;

use stack::{ResourceName, ResourceState, StateBackend, StateError};

/// In-process state. Starts empty unless seeded with [`Self::with_records`].
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    records: Mutex<Vec<ResourceState>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the backend, e.g. with a snapshot of a file backend for a preview.
    pub fn with_records(records: Vec<ResourceState>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn get(&self, name: &ResourceName) -> Result<Option<ResourceState>, StateError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| &r.name == name).cloned())
    }

    async fn put(&self, state: ResourceState) -> Result<(), StateError> {
        let mut records = self.records.lock().await;
        super::upsert(&mut records, state);
        Ok(())
    }

    async fn remove(&self, name: &ResourceName) -> Result<Option<ResourceState>, StateError> {
        let mut records = self.records.lock().await;
        Ok(super::take(&mut records, name))
    }

    async fn list(&self) -> Result<Vec<ResourceState>, StateError> {
        Ok(self.records.lock().await.clone())
    }
}
