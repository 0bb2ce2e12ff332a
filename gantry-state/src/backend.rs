//! State backend trait and error types

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::lock::LockInfo;
use crate::state::StateFile;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    #[error("Lock not found: {0}")]
    LockNotFound(String),

    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    #[error("Backend configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// Written state belongs to another lineage
    #[error("State lineage mismatch: expected {expected}, got {actual}")]
    LineageMismatch { expected: String, actual: String },

    #[error("Resource {0} is protected and cannot be removed from state")]
    Protected(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Storage for the state file, with locking for exclusive runs
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// `None` on first use
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Persist `state`; the caller bumps the serial first
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Fails while another unexpired lock is held
    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo>;

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Release a lock by ID without owning it
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;

    /// Prepare backing storage on first use
    async fn init(&self) -> BackendResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Backend type (e.g., "local")
    pub backend_type: String,
    pub attributes: HashMap<String, String>,
}

impl BackendConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Parse an integer attribute, failing on malformed values
    pub fn get_i64(&self, key: &str) -> BackendResult<Option<i64>> {
        self.get_string(key)
            .map(|raw| {
                raw.parse().map_err(|_| {
                    BackendError::configuration(format!("'{}' must be an integer, got '{}'", key, raw))
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_error_names_holder() {
        let lock = LockInfo::new("apply");
        let error = BackendError::locked(&lock);

        assert_eq!(
            error.to_string(),
            format!(
                "State is locked by {} (lock ID: {}, operation: apply)",
                lock.who, lock.id
            )
        );
    }

    #[test]
    fn test_config_integer_attribute() {
        let config = BackendConfig::new("local").with_attribute("lock_timeout_secs", "60");
        assert_eq!(config.get_i64("lock_timeout_secs").unwrap(), Some(60));
        assert_eq!(config.get_i64("missing").unwrap(), None);

        let config = BackendConfig::new("local").with_attribute("lock_timeout_secs", "soon");
        assert!(matches!(
            config.get_i64("lock_timeout_secs"),
            Err(BackendError::Configuration(_))
        ));
    }
}
