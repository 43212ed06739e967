//! Durable workflow records.
//!
//! [`SqliteWorkflowStore`] keeps one row per workflow in a `workflow_state`
//! table. `started_at` is stored as fixed-width RFC 3339 UTC text so that
//! lexical order is chronological; `rowid` breaks ties.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::state::{Metadata, WorkflowState, WorkflowStatus, WorkflowType};
use crate::error::{PacerError, Result};

/// Which records a [`WorkflowStore::find`] call returns.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub workflow_type: Option<WorkflowType>,
    /// Empty means any status.
    pub statuses: Vec<WorkflowStatus>,
    pub limit: Option<usize>,
}

impl WorkflowFilter {
    pub fn resumable(workflow_type: WorkflowType) -> Self {
        Self {
            workflow_type: Some(workflow_type),
            statuses: vec![WorkflowStatus::InProgress, WorkflowStatus::Paused],
            limit: Some(1),
        }
    }
}

/// Durable create/update of workflow records, newest first on reads.
pub trait WorkflowStore: Send + Sync {
    /// Inserts or overwrites the record with the same id. Atomic per record.
    fn save(&self, workflow: &WorkflowState) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<WorkflowState>>;

    /// Matching records ordered by `started_at` descending.
    fn find(&self, filter: &WorkflowFilter) -> Result<Vec<WorkflowState>>;
}

pub struct SqliteWorkflowStore {
    conn: Mutex<Connection>,
}

impl SqliteWorkflowStore {
    /// Open or create the workflow database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workflow_state (
                id TEXT PRIMARY KEY,
                workflow_type TEXT NOT NULL,
                status TEXT NOT NULL,
                current_step TEXT NOT NULL DEFAULT '',
                current_index INTEGER NOT NULL DEFAULT 0,
                total_items INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                paused_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_workflow_state_type_status
                ON workflow_state(workflow_type, status);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PacerError::Storage("workflow database lock poisoned".into()))
    }
}

impl WorkflowStore for SqliteWorkflowStore {
    fn save(&self, wf: &WorkflowState) -> Result<()> {
        let metadata = serde_json::to_string(&wf.metadata)?;
        self.conn()?.execute(
            "INSERT INTO workflow_state
                 (id, workflow_type, status, current_step, current_index, total_items,
                  started_at, paused_at, completed_at, error_message, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 current_step = excluded.current_step,
                 current_index = excluded.current_index,
                 total_items = excluded.total_items,
                 paused_at = excluded.paused_at,
                 completed_at = excluded.completed_at,
                 error_message = excluded.error_message,
                 metadata = excluded.metadata",
            params![
                wf.id,
                wf.workflow_type.as_str(),
                wf.status.as_str(),
                wf.current_step,
                wf.current_index,
                wf.total_items,
                timestamp(wf.started_at),
                wf.paused_at.map(timestamp),
                wf.completed_at.map(timestamp),
                wf.error_message,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<WorkflowState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM workflow_state WHERE id = ?1"),
                params![id],
                RawRow::read,
            )
            .optional()?;
        row.map(RawRow::decode).transpose()
    }

    fn find(&self, filter: &WorkflowFilter) -> Result<Vec<WorkflowState>> {
        let mut sql = format!("SELECT {COLUMNS} FROM workflow_state WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();

        if let Some(workflow_type) = filter.workflow_type {
            args.push(workflow_type.as_str().to_string());
            sql.push_str(&format!(" AND workflow_type = ?{}", args.len()));
        }
        if !filter.statuses.is_empty() {
            let mut slots = Vec::new();
            for status in &filter.statuses {
                args.push(status.as_str().to_string());
                slots.push(format!("?{}", args.len()));
            }
            sql.push_str(&format!(" AND status IN ({})", slots.join(", ")));
        }
        sql.push_str(" ORDER BY started_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), RawRow::read)?;
        let found = rows
            .map(|row| row.map_err(PacerError::from).and_then(RawRow::decode))
            .collect::<Result<Vec<_>>>()?;
        Ok(found)
    }
}

const COLUMNS: &str = "id, workflow_type, status, current_step, current_index, total_items, \
                       started_at, paused_at, completed_at, error_message, metadata";

/// Column values as stored, before parsing.
struct RawRow {
    id: String,
    workflow_type: String,
    status: String,
    current_step: String,
    current_index: u32,
    total_items: u32,
    started_at: String,
    paused_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
    metadata: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_type: row.get(1)?,
            status: row.get(2)?,
            current_step: row.get(3)?,
            current_index: row.get(4)?,
            total_items: row.get(5)?,
            started_at: row.get(6)?,
            paused_at: row.get(7)?,
            completed_at: row.get(8)?,
            error_message: row.get(9)?,
            metadata: row.get(10)?,
        })
    }

    fn decode(self) -> Result<WorkflowState> {
        let metadata: Metadata = serde_json::from_str(&self.metadata)?;
        Ok(WorkflowState {
            id: self.id,
            workflow_type: self.workflow_type.parse()?,
            status: self.status.parse()?,
            current_step: self.current_step,
            current_index: self.current_index,
            total_items: self.total_items,
            started_at: parse_timestamp(&self.started_at)?,
            paused_at: self.paused_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
            error_message: self.error_message,
            metadata,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| PacerError::Storage(format!("bad timestamp {raw:?}: {e}")))
}
