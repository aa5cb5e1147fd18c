//! Durable storage for aggregate snapshots.
//!
//! One JSON file per session, written to a temporary file and renamed into
//! place so a crash mid-write never leaves a truncated snapshot behind.

use crate::session::aggregate::AggregateSnapshot;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot for session {0}")]
    NotFound(Uuid),
    #[error("unsupported snapshot format {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    pub fn save(&self, snapshot: &AggregateSnapshot) -> Result<PathBuf, SnapshotError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(snapshot.aggregate.id());
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), "snapshot saved");
        Ok(path)
    }

    pub fn load(&self, session_id: Uuid) -> Result<AggregateSnapshot, SnapshotError> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Err(SnapshotError::NotFound(session_id));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Delete a snapshot. Missing snapshots are not an error.
    pub fn remove(&self, session_id: Uuid) -> Result<(), SnapshotError> {
        match std::fs::remove_file(self.path_for(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Session ids with a stored snapshot.
    pub fn list(&self) -> Result<Vec<Uuid>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::RawEvent;
    use crate::session::aggregate::{PipelineConfig, SessionAggregate};

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("sessions"));

        let mut aggregate = SessionAggregate::new("example.org", PipelineConfig::default());
        aggregate.start(Some(0.0)).unwrap();
        aggregate.submit(&RawEvent::key_press(65, Some('a'), 10.0)).unwrap();

        let path = store.save(&aggregate.snapshot()).unwrap();
        assert!(path.exists());
        assert_eq!(store.list().unwrap(), vec![aggregate.id()]);

        let loaded = store.load(aggregate.id()).unwrap();
        assert_eq!(loaded.aggregate, aggregate);

        store.remove(aggregate.id()).unwrap();
        store.remove(aggregate.id()).unwrap();
        assert!(matches!(
            store.load(aggregate.id()),
            Err(SnapshotError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }
}
