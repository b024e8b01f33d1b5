use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::domain::TestReport;
use crate::error::{Error, Result};

/// Persistence for generated reports, keyed by execution id.
pub trait ReportStore: Send + Sync {
    /// Insert or replace the report of an execution.
    fn save(&self, report: &TestReport) -> Result<()>;

    fn load(&self, execution_id: &str) -> Result<Option<TestReport>>;
}

pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|err| Error::Storage(format!("Failed to open SQLite: {err}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| Error::Storage(format!("Failed to set SQLite journal mode: {err}")))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|err| Error::Storage(format!("Failed to open SQLite: {err}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS test_reports (
             execution_id TEXT PRIMARY KEY,
             report_id TEXT NOT NULL,
             suite_id TEXT NOT NULL,
             status TEXT NOT NULL,
             content_hash TEXT NOT NULL,
             report_json TEXT NOT NULL,
             created_at INTEGER NOT NULL
           );",
        )
        .map_err(|err| Error::Storage(format!("Failed to initialize SQLite schema: {err}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ReportStore for SqliteReportStore {
    fn save(&self, report: &TestReport) -> Result<()> {
        let report_json = serde_json::to_string(report)?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO test_reports
               (execution_id, report_id, suite_id, status, content_hash, report_json, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT(execution_id)
           DO UPDATE SET
             report_id = excluded.report_id,
             status = excluded.status,
             content_hash = excluded.content_hash,
             report_json = excluded.report_json,
             created_at = excluded.created_at;",
            params![
                report.execution_id,
                report.id,
                report.suite_id,
                report.status.as_str(),
                report.content_hash,
                report_json,
                report.created_at as i64,
            ],
        )
        .map_err(|err| Error::Storage(format!("Failed to save report: {err}")))?;
        Ok(())
    }

    fn load(&self, execution_id: &str) -> Result<Option<TestReport>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw: Option<String> = conn
            .query_row(
                "SELECT report_json FROM test_reports WHERE execution_id = ?1 LIMIT 1;",
                params![execution_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| Error::Storage(format!("Failed to load report: {err}")))?;
        raw.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }
}
