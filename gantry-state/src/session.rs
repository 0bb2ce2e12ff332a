//! State session - A locked state file that a run writes through
//!
//! Every save or removal bumps the serial and is written to the backend
//! before the call returns, so state reflects each applied step even if the
//! run stops halfway.

use async_trait::async_trait;
use log::{debug, info};

use gantry_core::resource::{Resource, ResourceId};
use gantry_core::store::{StateStore, StoreError};

use crate::backend::{BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::{ResourceState, StateFile};

pub struct StateSession {
    backend: Box<dyn StateBackend>,
    state: StateFile,
    lock: LockInfo,
}

impl StateSession {
    /// Lock the backend and load its state, starting a new lineage on first use
    pub async fn open(backend: Box<dyn StateBackend>, operation: &str) -> BackendResult<Self> {
        backend.init().await?;
        let lock = backend.acquire_lock(operation).await?;

        let state = match backend.read_state().await {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!("No existing state; starting a new lineage");
                StateFile::new()
            }
            Err(e) => {
                backend.release_lock(&lock).await?;
                return Err(e);
            }
        };

        Ok(Self { backend, state, lock })
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    /// Recorded resources as the previous side of a diff
    pub fn resources(&self) -> BackendResult<Vec<Resource>> {
        self.state.to_resources()
    }

    /// Mark a recorded resource as undeletable
    pub async fn protect(&mut self, id: &ResourceId) -> BackendResult<()> {
        let Some(record) = self.state.resources.iter_mut().find(|r| r.matches(id)) else {
            return Err(BackendError::InvalidState(format!("{} is not in state", id)));
        };
        record.protected = true;
        self.persist().await
    }

    /// Release the lock
    pub async fn close(self) -> BackendResult<()> {
        self.backend.release_lock(&self.lock).await
    }

    async fn persist(&mut self) -> BackendResult<()> {
        self.state.increment_serial();
        self.backend.write_state(&self.state).await?;
        debug!("State serial is now {}", self.state.serial);
        Ok(())
    }
}

fn store_error(e: BackendError) -> StoreError {
    StoreError::new(e.to_string())
}

#[async_trait]
impl StateStore for StateSession {
    async fn save_resource(&mut self, resource: &Resource) -> Result<(), StoreError> {
        let record = ResourceState::from_resource(resource).map_err(store_error)?;
        self.state.upsert_resource(record);
        self.persist().await.map_err(store_error)
    }

    async fn remove_resource(&mut self, id: &ResourceId) -> Result<(), StoreError> {
        if self.state.find_resource(id).is_some_and(|r| r.protected) {
            return Err(store_error(BackendError::Protected(id.to_string())));
        }
        if self.state.remove_resource(id).is_none() {
            return Ok(());
        }
        self.persist().await.map_err(store_error)
    }

    fn is_protected(&self, id: &ResourceId) -> bool {
        self.state.find_resource(id).is_some_and(|r| r.protected)
    }
}
