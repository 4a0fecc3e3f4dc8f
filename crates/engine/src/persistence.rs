use std::sync::Arc;

use runsync_storage::{KeyValueStore, StorageError};
use snafu::{ResultExt, Snafu};

use super::ids::RunId;

pub const DEFAULT_ACTIVE_RUNS_KEY: &str = "runsync.active_runs";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PersistenceError {
    #[snafu(display("failed to encode active run ids on `{stage}`: {source}"))]
    EncodeRunIds {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("stored active run ids under '{key}' are malformed: {source}"))]
    DecodeRunIds {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("client storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Mirrors the ids of running runs into durable storage as one JSON array.
///
/// Only ids are written. Full run records hold a cancellation handle and cannot
/// be restored, so a loaded id list is informational.
#[derive(Clone)]
pub struct ActiveRunPersistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl ActiveRunPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Rewrites the whole key. Failures are logged and swallowed; the return
    /// value reports whether the write landed.
    pub fn save(&self, run_ids: &[RunId]) -> bool {
        match self.try_save(run_ids) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    key = %self.key,
                    run_count = run_ids.len(),
                    error = %error,
                    "failed to persist active run ids"
                );
                false
            }
        }
    }

    pub fn try_save(&self, run_ids: &[RunId]) -> PersistenceResult<()> {
        let encoded = serde_json::to_string(run_ids).context(EncodeRunIdsSnafu {
            stage: "persist-encode",
        })?;
        self.store.set(&self.key, &encoded).context(StorageSnafu {
            stage: "persist-write",
        })
    }

    /// Ids believed active as of the previous session's last mutation.
    /// Missing or unreadable state yields an empty list.
    pub fn load(&self) -> Vec<RunId> {
        match self.try_load() {
            Ok(run_ids) => run_ids,
            Err(error) => {
                tracing::warn!(key = %self.key, error = %error, "failed to restore active run ids");
                Vec::new()
            }
        }
    }

    pub fn try_load(&self) -> PersistenceResult<Vec<RunId>> {
        let Some(raw) = self.store.get(&self.key).context(StorageSnafu {
            stage: "restore-read",
        })?
        else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&raw).context(DecodeRunIdsSnafu {
            stage: "restore-decode",
            key: self.key.clone(),
        })
    }
}

impl std::fmt::Debug for ActiveRunPersistence {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ActiveRunPersistence")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use runsync_storage::{MemoryStore, StorageResult};

    /// Store whose every operation fails, for exercising the swallow paths.
    pub(crate) struct UnavailableStore;

    impl KeyValueStore for UnavailableStore {
        fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Err(unavailable())
        }

        fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(unavailable())
        }

        fn remove(&self, _key: &str) -> StorageResult<()> {
            Err(unavailable())
        }
    }

    fn unavailable() -> StorageError {
        StorageError::InvariantViolation {
            stage: "test-unavailable",
            details: "quota exceeded".to_string(),
        }
    }

    #[test]
    fn saves_a_json_array_of_ids() {
        let store = Arc::new(MemoryStore::new());
        let persistence = ActiveRunPersistence::new(store.clone(), DEFAULT_ACTIVE_RUNS_KEY);

        persistence.save(&[RunId::new("r1"), RunId::new("r2")]);
        assert_eq!(
            store.get(DEFAULT_ACTIVE_RUNS_KEY).unwrap().as_deref(),
            Some(r#"["r1","r2"]"#)
        );

        persistence.save(&[]);
        assert_eq!(
            store.get(DEFAULT_ACTIVE_RUNS_KEY).unwrap().as_deref(),
            Some("[]")
        );
        assert!(persistence.load().is_empty());
    }

    #[test]
    fn load_round_trips_and_tolerates_garbage() {
        let store = Arc::new(MemoryStore::new());
        let persistence = ActiveRunPersistence::new(store.clone(), "k");
        assert!(persistence.load().is_empty());

        persistence.save(&[RunId::new("r9")]);
        assert_eq!(persistence.load(), vec![RunId::new("r9")]);

        store.set("k", "{not json").unwrap();
        assert!(matches!(
            persistence.try_load(),
            Err(PersistenceError::DecodeRunIds { .. })
        ));
        assert!(persistence.load().is_empty());
    }

    #[test]
    fn storage_failures_are_swallowed() {
        let persistence = ActiveRunPersistence::new(Arc::new(UnavailableStore), "k");
        assert!(!persistence.save(&[RunId::new("r1")]));
        assert!(persistence.load().is_empty());
        assert!(matches!(
            persistence.try_save(&[]),
            Err(PersistenceError::Storage { .. })
        ));
    }
}
