//! Local file backend for state storage
//!
//! State lives in a JSON file (default: gantry.state.json) next to a `.lock`
//! file that is created exclusively, so two runs cannot hold it at once.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Duration;
use log::{debug, warn};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::{DEFAULT_LOCK_TIMEOUT_SECS, LockInfo};
use crate::state::StateFile;

pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl LocalBackend {
    pub const DEFAULT_STATE_FILE: &'static str = "gantry.state.json";

    pub fn with_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
            lock_timeout: Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Attributes: `path`, `lock_timeout_secs`
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let backend = Self::with_path(config.get_string("path").unwrap_or(Self::DEFAULT_STATE_FILE));
        Ok(match config.get_i64("lock_timeout_secs")? {
            Some(secs) => backend.lock_timeout(Duration::seconds(secs)),
            None => backend,
        })
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read lock file", e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| BackendError::InvalidState(format!("Failed to parse lock file: {}", e)))
    }

    async fn remove_lock(&self) -> BackendResult<()> {
        fs::remove_file(&self.lock_path)
            .await
            .map_err(|e| io_error("remove lock file", e))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::with_path(Self::DEFAULT_STATE_FILE)
    }
}

fn io_error(action: &str, e: std::io::Error) -> BackendError {
    BackendError::Io(format!("Failed to {}: {}", action, e))
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read state file", e)),
        };

        let state = serde_json::from_str(&content)
            .map_err(|e| BackendError::InvalidState(format!("Failed to parse state file: {}", e)))?;
        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(existing) = self.read_state().await?
            && existing.lineage != state.lineage
        {
            return Err(BackendError::LineageMismatch {
                expected: existing.lineage,
                actual: state.lineage.clone(),
            });
        }

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize state: {}", e)))?;

        // write then rename so a crash never leaves a truncated state file
        let staging = self.state_path.with_extension("json.tmp");
        fs::write(&staging, content)
            .await
            .map_err(|e| io_error("write state file", e))?;
        fs::rename(&staging, &self.state_path)
            .await
            .map_err(|e| io_error("replace state file", e))?;

        debug!("Wrote state serial {} to {}", state.serial, self.state_path.display());
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        if let Some(existing) = self.read_lock().await? {
            if !existing.is_expired() {
                return Err(BackendError::locked(&existing));
            }
            warn!(
                "Taking over expired lock {} held by {} since {}",
                existing.id, existing.who, existing.created
            );
            self.remove_lock().await?;
        }

        let lock = LockInfo::with_timeout(operation, self.lock_timeout);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // lost a race with another run
                return match self.read_lock().await? {
                    Some(holder) => Err(BackendError::locked(&holder)),
                    None => Err(io_error("create lock file", e)),
                };
            }
            Err(e) => return Err(io_error("create lock file", e)),
        };
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_error("write lock file", e))?;
        file.flush().await.map_err(|e| io_error("write lock file", e))?;

        debug!("Acquired state lock {} for {}", lock.id, operation);
        Ok(lock)
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }
        self.remove_lock().await
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        match self.read_lock().await? {
            None => Err(BackendError::LockNotFound(lock_id.to_string())),
            Some(existing) if existing.id != lock_id => Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            }),
            Some(existing) => {
                warn!("Force-unlocking state lock {} held by {}", existing.id, existing.who);
                self.remove_lock().await
            }
        }
    }

    async fn init(&self) -> BackendResult<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create state directory", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        assert!(backend.read_state().await.unwrap().is_none());

        let mut state = StateFile::new();
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let read = backend.read_state().await.unwrap().unwrap();
        assert_eq!(read.serial, 1);
        assert_eq!(read.lineage, state.lineage);
    }

    #[tokio::test]
    async fn test_write_rejects_other_lineage() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));
        backend.write_state(&StateFile::new()).await.unwrap();

        let result = backend.write_state(&StateFile::new()).await;
        assert!(matches!(result, Err(BackendError::LineageMismatch { .. })));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let lock = backend.acquire_lock("apply").await.unwrap();
        match backend.acquire_lock("plan").await {
            Err(BackendError::Locked { lock_id, operation, .. }) => {
                assert_eq!(lock_id, lock.id);
                assert_eq!(operation, "apply");
            }
            other => panic!("Expected Locked, got {other:?}"),
        }

        backend.release_lock(&lock).await.unwrap();
        let again = backend.acquire_lock("refresh").await.unwrap();
        backend.release_lock(&again).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.state.json");
        let stale = LocalBackend::with_path(&path).lock_timeout(Duration::seconds(-1));
        let stale_lock = stale.acquire_lock("apply").await.unwrap();

        let backend = LocalBackend::with_path(&path);
        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_ne!(lock.id, stale_lock.id);

        assert!(matches!(
            backend.release_lock(&stale_lock).await,
            Err(BackendError::LockMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_force_unlock_requires_matching_id() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        assert!(matches!(
            backend.force_unlock("nope").await,
            Err(BackendError::LockNotFound(_))
        ));

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert!(backend.force_unlock("nope").await.is_err());
        backend.force_unlock(&lock.id).await.unwrap();
        assert!(backend.read_lock().await.unwrap().is_none());
    }

    #[test]
    fn test_from_config() {
        let backend = LocalBackend::from_config(&BackendConfig::new("local")).unwrap();
        assert_eq!(backend.state_path(), Path::new("gantry.state.json"));

        let config = BackendConfig::new("local")
            .with_attribute("path", "envs/prod.state.json")
            .with_attribute("lock_timeout_secs", "60");
        let backend = LocalBackend::from_config(&config).unwrap();
        assert_eq!(backend.state_path(), Path::new("envs/prod.state.json"));
        assert_eq!(backend.lock_timeout, Duration::seconds(60));
    }
}
