//! SQLite-backed persistence for Salesloop.
//!
//! All reads and writes go through a single shared connection guarded by a
//! mutex, so writers are serialized at the connection level. Claim
//! operations (job claim, task compare-and-swap) run as conditional updates
//! checked by rows-affected, which stays correct even with multiple pollers
//! or processes on the same database file.
//!
//! There is no lease or heartbeat: a process crash while a job or task is
//! `running` leaves the row stuck until an operator intervenes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use salesloop_core::error::{Result, SalesloopError};

mod customers;
mod jobs;
mod settings;
mod tasks;

pub use tasks::NewScheduledTask;

/// The shared store all background components persist through.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!("📂 Opening database at {}", path.display());
        let conn = Connection::open(path)
            .map_err(|e| SalesloopError::Store(format!("open database: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SalesloopError::Store(format!("open database: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                website TEXT,
                country TEXT,
                grade TEXT,
                grade_reason TEXT,
                summary TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                name TEXT,
                title TEXT,
                email TEXT,
                phone TEXT,
                is_key INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                type TEXT NOT NULL,
                subject TEXT,
                body TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                provider_message_id TEXT,
                sent_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS followups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                initial_email_id INTEGER,
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE CASCADE,
                FOREIGN KEY(initial_email_id) REFERENCES emails(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                due_at TEXT NOT NULL,
                status TEXT NOT NULL,
                last_error TEXT,
                context_email_id INTEGER NOT NULL,
                generated_email_id INTEGER,
                schedule_mode TEXT NOT NULL DEFAULT 'simple',
                delay_value INTEGER NOT NULL DEFAULT 0,
                delay_unit TEXT,
                cron_expression TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE CASCADE,
                FOREIGN KEY(context_email_id) REFERENCES emails(id) ON DELETE SET NULL,
                FOREIGN KEY(generated_email_id) REFERENCES emails(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS automation_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                stage TEXT NOT NULL,
                last_error TEXT,
                started_at TEXT,
                finished_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                admin_email TEXT NOT NULL DEFAULT '',
                automation_required_grade TEXT NOT NULL DEFAULT 'A',
                automation_followup_days INTEGER NOT NULL DEFAULT 3,
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(|e| SalesloopError::Store(format!("migrate: {e}")))?;

        // Columns added after the first release; safe to fail when present.
        let _ = conn.execute(
            "ALTER TABLE scheduled_tasks ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0",
            [],
        );
        let _ = conn.execute("ALTER TABLE emails ADD COLUMN provider_message_id TEXT", []);

        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SalesloopError::Store(format!("connection lock poisoned: {e}")))
    }
}

/// Current time in the RFC 3339 text form every table stores.
pub(crate) fn now_text() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_schema_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salesloop.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        // Re-running migrations on an existing database is a no-op.
        drop(store);
        Store::open(&path).unwrap();
    }

    #[test]
    fn timestamps_round_trip() {
        let text = now_text();
        let parsed = parse_ts(&text);
        assert!((Utc::now() - parsed).num_seconds().abs() < 2);
        assert_eq!(parse_ts_opt(None), None);
        assert!(parse_ts_opt(Some(text)).is_some());
    }
}
