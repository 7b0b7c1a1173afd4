//! Snapshot persistence for tunable parameters.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::params::TunableParameters;

/// Full copy of the tunable parameters at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    /// Why the snapshot was taken, e.g. the proposal it precedes
    pub label: String,
    pub parameters: TunableParameters,
}

impl ParameterSnapshot {
    #[must_use]
    pub fn new(label: impl Into<String>, parameters: TunableParameters, taken_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            taken_at,
            label: label.into(),
            parameters,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot {0} not found")]
    NotFound(Uuid),

    #[error("snapshot I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot file {path} is malformed: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage for parameter snapshots.
pub trait SnapshotStore: Send + Sync {
    /// # Errors
    /// Returns [`SnapshotError`] if the snapshot could not be persisted.
    fn save(&self, snapshot: &ParameterSnapshot) -> Result<(), SnapshotError>;

    /// # Errors
    /// Returns [`SnapshotError::NotFound`] for an unknown id.
    fn load(&self, id: Uuid) -> Result<ParameterSnapshot, SnapshotError>;

    /// All snapshots, oldest first.
    ///
    /// # Errors
    /// Returns [`SnapshotError`] if the backing storage cannot be read.
    fn list(&self) -> Result<Vec<ParameterSnapshot>, SnapshotError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<Vec<ParameterSnapshot>>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, snapshot: &ParameterSnapshot) -> Result<(), SnapshotError> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<ParameterSnapshot, SnapshotError> {
        self.snapshots
            .lock()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(SnapshotError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<ParameterSnapshot>, SnapshotError> {
        Ok(self.snapshots.lock().clone())
    }
}

/// One pretty-printed JSON file per snapshot, named `<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    dir: PathBuf,
}

impl JsonFileSnapshotStore {
    /// Creates the directory if needed.
    ///
    /// # Errors
    /// Returns [`SnapshotError::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SnapshotError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read(path: &Path) -> Result<ParameterSnapshot, SnapshotError> {
        let raw = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SnapshotError::Format {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    fn save(&self, snapshot: &ParameterSnapshot) -> Result<(), SnapshotError> {
        let path = self.path_for(snapshot.id);
        let json = serde_json::to_string_pretty(snapshot).map_err(|source| {
            SnapshotError::Format {
                path: path.clone(),
                source,
            }
        })?;
        // Write then rename so a crash never leaves a half-written snapshot.
        let partial = path.with_extension("json.partial");
        fs::write(&partial, json)
            .and_then(|()| fs::rename(&partial, &path))
            .map_err(|source| SnapshotError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(id = %snapshot.id, path = %path.display(), "snapshot written");
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<ParameterSnapshot, SnapshotError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(SnapshotError::NotFound(id));
        }
        Self::read(&path)
    }

    fn list(&self) -> Result<Vec<ParameterSnapshot>, SnapshotError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SnapshotError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                snapshots.push(Self::read(&path)?);
            }
        }
        snapshots.sort_by_key(|s| s.taken_at);
        Ok(snapshots)
    }
}
