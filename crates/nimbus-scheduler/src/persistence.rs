//! SQLite-backed persistence for schedules.
//!
//! Trigger, task and conditions are stored as JSON columns; counters and
//! timestamps as plain columns so `record_run` can bump them without a
//! read-modify-write round trip.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use nimbus_core::Result;

use crate::schedules::Schedule;

/// Schedule storage. The connection is behind a mutex so the store can be
/// shared between the timer loop and the batch runner.
pub struct ScheduleStore {
    conn: Mutex<Connection>,
}

impl ScheduleStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::from_conn(Connection::open(path)?)
    }

    /// Private in-memory database, used by tests and the dry-run mode.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                trigger TEXT NOT NULL,        -- JSON
                task TEXT NOT NULL,           -- JSON
                conditions TEXT NOT NULL,     -- JSON array
                task_enabled INTEGER NOT NULL DEFAULT 1,
                run_immediately INTEGER NOT NULL DEFAULT 0,
                expires TEXT,
                start_after TEXT,
                max_run_count INTEGER,
                total_run_count INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                deleted TEXT,
                created TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_schedules_owner_name
                ON schedules(owner_id, name);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn save(&self, schedule: &Schedule) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO schedules
             (id, owner_id, name, description, trigger, task, conditions,
              task_enabled, run_immediately, expires, start_after,
              max_run_count, total_run_count, last_run_at, deleted, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                schedule.id,
                schedule.owner_id,
                schedule.name,
                schedule.description,
                serde_json::to_string(&schedule.trigger)?,
                serde_json::to_string(&schedule.task)?,
                serde_json::to_string(&schedule.conditions)?,
                schedule.task_enabled as i32,
                schedule.run_immediately as i32,
                schedule.expires.map(|t| t.to_rfc3339()),
                schedule.start_after.map(|t| t.to_rfc3339()),
                schedule.max_run_count,
                schedule.total_run_count,
                schedule.last_run_at.map(|t| t.to_rfc3339()),
                schedule.deleted.map(|t| t.to_rfc3339()),
                schedule.created.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Schedule>> {
        self.query_one("SELECT * FROM schedules WHERE id = ?1", params![id])
    }

    /// Lookup by name among the owner's non-deleted schedules. Backs the
    /// uniqueness check in `Schedule::add`.
    pub fn get_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Schedule>> {
        self.query_one(
            "SELECT * FROM schedules WHERE owner_id = ?1 AND name = ?2 AND deleted IS NULL",
            params![owner_id, name],
        )
    }

    /// All non-deleted schedules, oldest first.
    pub fn load_all(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM schedules WHERE deleted IS NULL ORDER BY created")?;
        let raw: Vec<RawRow> = stmt
            .query_map([], RawRow::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        drop(conn);
        raw.into_iter().map(RawRow::into_schedule).collect()
    }

    /// Bump the run counter and stamp the run time after a batch completes.
    pub fn record_run(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE schedules SET total_run_count = total_run_count + 1, last_run_at = ?2
             WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn soft_delete(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE schedules SET deleted = ?2 WHERE id = ?1 AND deleted IS NULL",
            params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query_map(params, RawRow::from_row)?;
        match rows.next() {
            Some(row) => {
                let raw = row?;
                drop(rows);
                drop(stmt);
                drop(conn);
                Ok(Some(raw.into_schedule()?))
            }
            None => Ok(None),
        }
    }
}

/// Column values as stored, before JSON columns are decoded. Keeping the
/// decode outside `query_map` lets serde errors surface as our own error
/// type instead of being shoehorned into rusqlite's.
struct RawRow {
    id: String,
    owner_id: String,
    name: String,
    description: String,
    trigger: String,
    task: String,
    conditions: String,
    task_enabled: bool,
    run_immediately: bool,
    expires: Option<String>,
    start_after: Option<String>,
    max_run_count: Option<u32>,
    total_run_count: u32,
    last_run_at: Option<String>,
    deleted: Option<String>,
    created: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            trigger: row.get("trigger")?,
            task: row.get("task")?,
            conditions: row.get("conditions")?,
            task_enabled: row.get::<_, i32>("task_enabled")? != 0,
            run_immediately: row.get::<_, i32>("run_immediately")? != 0,
            expires: row.get("expires")?,
            start_after: row.get("start_after")?,
            max_run_count: row.get("max_run_count")?,
            total_run_count: row.get("total_run_count")?,
            last_run_at: row.get("last_run_at")?,
            deleted: row.get("deleted")?,
            created: row.get("created")?,
        })
    }

    fn into_schedule(self) -> Result<Schedule> {
        Ok(Schedule {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            description: self.description,
            trigger: serde_json::from_str(&self.trigger)?,
            task: serde_json::from_str(&self.task)?,
            conditions: serde_json::from_str(&self.conditions)?,
            task_enabled: self.task_enabled,
            run_immediately: self.run_immediately,
            expires: parse_ts(self.expires),
            start_after: parse_ts(self.start_after),
            max_run_count: self.max_run_count,
            total_run_count: self.total_run_count,
            last_run_at: parse_ts(self.last_run_at),
            deleted: parse_ts(self.deleted),
            created: parse_ts(Some(self.created)).unwrap_or_else(Utc::now),
        })
    }
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}
