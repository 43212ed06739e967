//! Durable snapshot of the limiter: the 24-hour action ledger plus per-type
//! burst and cooldown state, stamped with the time it was saved.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::profile::ActionType;
use crate::error::{PacerError, Result};

/// Ledger retention and snapshot staleness horizon.
pub const RETENTION_HOURS: i64 = 24;

/// One successful action. Immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub action: ActionType,
}

/// Mutable burst/cooldown bookkeeping for one action type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    pub last_action_time: Option<DateTime<Utc>>,
    pub burst_count: u32,
    pub burst_window_start: Option<DateTime<Utc>>,
    pub in_cooldown: bool,
    pub cooldown_ends_at: Option<DateTime<Utc>>,
}

impl ActionState {
    /// Leaves cooldown. Always resets the burst counter with it.
    pub(crate) fn clear_cooldown(&mut self) {
        self.in_cooldown = false;
        self.cooldown_ends_at = None;
        self.burst_count = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterSnapshot {
    pub actions: Vec<ActionRecord>,
    pub states: BTreeMap<ActionType, ActionState>,
    pub saved_at: DateTime<Utc>,
}

impl LimiterSnapshot {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.saved_at > chrono::Duration::hours(RETENTION_HOURS)
    }
}

/// Durable key-value slot for the limiter snapshot. Saves must be atomic.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet; `Err` when the stored blob is unreadable.
    fn load(&self) -> Result<Option<LimiterSnapshot>>;

    fn save(&self, snapshot: &LimiterSnapshot) -> Result<()>;
}

/// Stores the snapshot as pretty JSON, replacing the file atomically.
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
    fn load(&self) -> Result<Option<LimiterSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let snapshot = serde_json::from_str(&contents)?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &LimiterSnapshot) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&self.path, &data)
    }
}

/// Keeps the snapshot in memory only. Useful for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<LimiterSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LimiterSnapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<LimiterSnapshot>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| PacerError::Storage("snapshot slot poisoned".into()))?;
        Ok(slot.clone())
    }

    fn save(&self, snapshot: &LimiterSnapshot) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| PacerError::Storage("snapshot slot poisoned".into()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }
}

/// Write `data` to `path` through a tempfile in the same directory, then rename.
/// A crash mid-write leaves the previous file intact.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample(saved_at: DateTime<Utc>) -> LimiterSnapshot {
        let mut states = BTreeMap::new();
        states.insert(
            ActionType::Connect,
            ActionState {
                last_action_time: Some(saved_at),
                burst_count: 2,
                burst_window_start: Some(saved_at),
                in_cooldown: false,
                cooldown_ends_at: None,
            },
        );
        LimiterSnapshot {
            actions: vec![ActionRecord {
                timestamp: saved_at,
                action: ActionType::Connect,
            }],
            states,
            saved_at,
        }
    }

    #[test]
    fn json_store_returns_none_when_missing() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn json_store_persists_and_creates_parents() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("nested/dir/state.json"));
        let at = Utc.with_ymd_and_hms(2025, 6, 11, 10, 0, 0).unwrap();
        store.save(&sample(at)).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.actions.len(), 1);
        assert_eq!(loaded.states[&ActionType::Connect].burst_count, 2);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = JsonSnapshotStore::new(&path);
        assert!(store.load().is_err());
    }

    #[test]
    fn ledger_uses_type_field_name() {
        let at = Utc.with_ymd_and_hms(2025, 6, 11, 10, 0, 0).unwrap();
        let json = serde_json::to_string(&sample(at)).unwrap();
        assert!(json.contains(r#""type":"connect""#));
    }

    #[test]
    fn staleness_is_24_hours() {
        let at = Utc.with_ymd_and_hms(2025, 6, 11, 10, 0, 0).unwrap();
        let snapshot = sample(at);
        assert!(!snapshot.is_stale(at + chrono::Duration::hours(24)));
        assert!(snapshot.is_stale(at + chrono::Duration::hours(24) + chrono::Duration::seconds(1)));
    }

    #[test]
    fn clearing_cooldown_resets_burst() {
        let mut state = ActionState {
            burst_count: 5,
            in_cooldown: true,
            cooldown_ends_at: Some(Utc::now()),
            ..Default::default()
        };
        state.clear_cooldown();
        assert!(!state.in_cooldown);
        assert_eq!(state.burst_count, 0);
        assert!(state.cooldown_ends_at.is_none());
    }
}
