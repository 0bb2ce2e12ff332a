//! Store - Where the executor records each applied change
//!
//! The executor writes after every successful step rather than once at the
//! end, so a partially applied run is still visible in persisted state.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::resource::{Resource, ResourceId};

#[derive(Debug, thiserror::Error)]
#[error("state store error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait StateStore: Send {
    /// Insert or replace the persisted record of a resource
    async fn save_resource(&mut self, resource: &Resource) -> Result<(), StoreError>;

    /// Drop a resource from persisted state
    async fn remove_resource(&mut self, id: &ResourceId) -> Result<(), StoreError>;

    /// A protected resource must never be deleted
    fn is_protected(&self, _id: &ResourceId) -> bool {
        false
    }
}

/// In-memory store, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub resources: BTreeMap<ResourceId, Resource>,
    pub protected: BTreeSet<ResourceId>,
    /// Number of writes performed
    pub writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            resources: resources.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ..Default::default()
        }
    }

    pub fn protect(&mut self, id: ResourceId) {
        self.protected.insert(id);
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_resource(&mut self, resource: &Resource) -> Result<(), StoreError> {
        self.resources.insert(resource.id.clone(), resource.clone());
        self.writes += 1;
        Ok(())
    }

    async fn remove_resource(&mut self, id: &ResourceId) -> Result<(), StoreError> {
        if self.protected.contains(id) {
            return Err(StoreError::new(format!("{} is protected", id)));
        }
        self.resources.remove(id);
        self.writes += 1;
        Ok(())
    }

    fn is_protected(&self, id: &ResourceId) -> bool {
        self.protected.contains(id)
    }
}
