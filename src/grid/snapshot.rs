//! Level snapshots with JSON persistence
//!
//! A snapshot is a JSON array with one [`LevelRecord`] per level, always
//! rewritten in full through a temp file and a rename.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::errors::{GridError, GridResult};
use super::types::LevelStatus;

/// Persisted form of one level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelRecord {
    pub id: u32,
    pub buy_price: f64,
    pub sell_price: f64,
    pub qty: f64,
    pub status: LevelStatus,
    #[serde(default)]
    pub order_id: Option<String>,
    pub last_action_time: DateTime<Utc>,
}

/// Durable storage for level snapshots
pub trait SnapshotStore: Send + Sync {
    fn save(&self, records: &[LevelRecord]) -> GridResult<()>;

    /// `Ok(None)` when nothing has been saved yet
    fn load(&self) -> GridResult<Option<Vec<LevelRecord>>>;
}

/// Snapshot file on the local filesystem
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn save(&self, records: &[LevelRecord]) -> GridResult<()> {
        save_json_atomic(&self.path, &records)?;
        debug!("Snapshot of {} levels saved to {:?}", records.len(), self.path);
        Ok(())
    }

    fn load(&self) -> GridResult<Option<Vec<LevelRecord>>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let records: Vec<LevelRecord> = serde_json::from_str(&content).map_err(|e| {
            GridError::StatePersistence(format!("corrupt snapshot {:?}: {}", self.path, e))
        })?;
        info!("Loaded {} level records from {:?}", records.len(), self.path);
        Ok(Some(records))
    }
}

/// Write `value` as pretty JSON: temp file first, then rename over `path`.
///
/// Creates the parent directory when missing.
pub fn save_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> GridResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// In-memory store for tests
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    pub struct MemorySnapshotStore {
        pub saved: Arc<Mutex<Vec<Vec<LevelRecord>>>>,
        pub initial: Option<Vec<LevelRecord>>,
        pub fail_save: bool,
    }

    impl MemorySnapshotStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_records(records: Vec<LevelRecord>) -> Self {
            Self {
                initial: Some(records),
                ..Default::default()
            }
        }

        pub fn save_count(&self) -> usize {
            self.saved.lock().map(|s| s.len()).unwrap_or(0)
        }

        pub fn last(&self) -> Option<Vec<LevelRecord>> {
            self.saved.lock().ok().and_then(|s| s.last().cloned())
        }
    }

    impl SnapshotStore for MemorySnapshotStore {
        fn save(&self, records: &[LevelRecord]) -> GridResult<()> {
            if self.fail_save {
                return Err(GridError::StatePersistence("mock save failure".into()));
            }
            self.saved
                .lock()
                .map_err(|e| GridError::StatePersistence(e.to_string()))?
                .push(records.to_vec());
            Ok(())
        }

        fn load(&self) -> GridResult<Option<Vec<LevelRecord>>> {
            Ok(self.initial.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, status: LevelStatus, order_id: Option<&str>) -> LevelRecord {
        LevelRecord {
            id,
            buy_price: 100.0 - id as f64,
            sell_price: 101.0 - id as f64,
            qty: 20.0,
            status,
            order_id: order_id.map(String::from),
            last_action_time: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("snapshots").join("strategies.json"));

        assert_eq!(store.load().unwrap(), None);

        let records = vec![
            record(0, LevelStatus::Standby, None),
            record(1, LevelStatus::Selling, Some("abc")),
        ];
        store.save(&records).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, records);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_snapshot_is_a_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("s.json"));
        store.save(&[record(2, LevelStatus::Buying, Some("x"))]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        let first = &raw.as_array().unwrap()[0];
        assert_eq!(first["status"], "BUYING");
        assert_eq!(first["order_id"], "x");
        assert!(first["last_action_time"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_corrupt_snapshot_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonSnapshotStore::new(&path).load().unwrap_err();
        assert!(matches!(err, GridError::StatePersistence(_)));
    }
}
