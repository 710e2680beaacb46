//! Scheduled follow-up task persistence: create, due fetch, compare-and-swap
//! claim, retry rescheduling, finalization.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use salesloop_core::error::{Result, SalesloopError};
use salesloop_core::types::{DelayUnit, ScheduleMode, ScheduledTask, TaskStatus};

use crate::{now_text, parse_ts, Store};

const TASK_COLUMNS: &str = "id, customer_id, due_at, status, last_error, context_email_id, \
     generated_email_id, schedule_mode, delay_value, delay_unit, cron_expression, attempts, \
     created_at, updated_at";

/// Scheduling metadata persisted alongside the due time.
#[derive(Debug, Clone)]
pub struct NewScheduledTask {
    pub customer_id: i64,
    pub context_email_id: i64,
    pub due_at: DateTime<Utc>,
    pub mode: ScheduleMode,
    pub delay_value: i64,
    pub delay_unit: Option<DelayUnit>,
    pub cron_expression: Option<String>,
}

impl Store {
    /// Insert a new task in status `scheduled`.
    pub fn create_task(&self, input: &NewScheduledTask) -> Result<i64> {
        if input.customer_id <= 0 || input.context_email_id <= 0 {
            return Err(SalesloopError::Validation(
                "invalid scheduling references".into(),
            ));
        }
        let conn = self.lock()?;
        let now = now_text();
        conn.execute(
            "INSERT INTO scheduled_tasks (
                customer_id, due_at, status, last_error, context_email_id, generated_email_id,
                schedule_mode, delay_value, delay_unit, cron_expression, attempts,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, NULL, ?4, NULL, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
            params![
                input.customer_id,
                input.due_at.to_rfc3339(),
                TaskStatus::Scheduled.as_str(),
                input.context_email_id,
                input.mode.as_str(),
                input.delay_value,
                input.delay_unit.map(|u| u.as_str()),
                input.cron_expression.as_deref().map(str::trim),
                now
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("create scheduled task: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_task(&self, task_id: i64) -> Result<ScheduledTask> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
            params![task_id],
            task_from_row,
        )
        .optional()
        .map_err(|e| SalesloopError::Store(format!("query task: {e}")))?
        .ok_or_else(|| SalesloopError::NotFound(format!("scheduled task {task_id}")))
    }

    /// Most recently updated task for a customer, any status.
    pub fn latest_task(&self, customer_id: i64) -> Result<Option<ScheduledTask>> {
        if customer_id <= 0 {
            return Err(SalesloopError::Validation("invalid customer id".into()));
        }
        let conn = self.lock()?;
        let task = conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM scheduled_tasks
                     WHERE customer_id = ?1 ORDER BY updated_at DESC, id DESC LIMIT 1"
                ),
                params![customer_id],
                task_from_row,
            )
            .optional()
            .map_err(|e| SalesloopError::Store(format!("query latest task: {e}")))?;
        Ok(task)
    }

    /// Tasks that should run now, earliest due first.
    pub fn due_tasks(&self, limit: i64) -> Result<Vec<ScheduledTask>> {
        let limit = if limit <= 0 { 10 } else { limit };
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks
                 WHERE status = ?1 AND due_at <= ?2
                 ORDER BY due_at ASC LIMIT ?3"
            ))
            .map_err(|e| SalesloopError::Store(format!("query due tasks: {e}")))?;
        let tasks = stmt
            .query_map(
                params![TaskStatus::Scheduled.as_str(), now_text(), limit],
                task_from_row,
            )
            .map_err(|e| SalesloopError::Store(format!("query due tasks: {e}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| SalesloopError::Store(format!("scan due tasks: {e}")))?;
        Ok(tasks)
    }

    /// Tasks filtered by status, or all when `None`.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let (sql, filter) = match status {
            Some(status) => (
                format!(
                    "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE status = ?1 ORDER BY id ASC"
                ),
                Some(status.as_str()),
            ),
            None => (
                format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks ORDER BY id ASC"),
                None,
            ),
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SalesloopError::Store(format!("list tasks: {e}")))?;
        let rows = match filter {
            Some(status) => stmt.query_map(params![status], task_from_row),
            None => stmt.query_map([], task_from_row),
        }
        .map_err(|e| SalesloopError::Store(format!("list tasks: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| SalesloopError::Store(format!("scan tasks: {e}")))
    }

    /// Compare-and-swap `scheduled → running`.
    ///
    /// This is the task-level mutual-exclusion guard: exactly one caller
    /// wins; everyone else gets a conflict because the status already moved.
    pub fn claim_task(&self, task_id: i64) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE scheduled_tasks SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![
                    TaskStatus::Running.as_str(),
                    now_text(),
                    task_id,
                    TaskStatus::Scheduled.as_str()
                ],
            )
            .map_err(|e| SalesloopError::Store(format!("claim task: {e}")))?;
        if affected == 0 {
            return Err(SalesloopError::Conflict(format!(
                "task {task_id} status already changed"
            )));
        }
        Ok(())
    }

    /// Re-queue a failed task for a later retry.
    pub fn reschedule_task(
        &self,
        task_id: i64,
        due_at: DateTime<Utc>,
        attempts: i64,
        last_error: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scheduled_tasks
             SET status = ?1, due_at = ?2, attempts = ?3, last_error = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                TaskStatus::Scheduled.as_str(),
                due_at.to_rfc3339(),
                attempts,
                last_error.trim(),
                now_text(),
                task_id
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("reschedule task: {e}")))?;
        Ok(())
    }

    /// Terminal transition to `sent` or `failed`.
    pub fn finalize_task(
        &self,
        task_id: i64,
        status: TaskStatus,
        generated_email_id: Option<i64>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scheduled_tasks
             SET status = ?1, generated_email_id = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                generated_email_id,
                last_error.map(str::trim),
                now_text(),
                task_id
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("finalize task: {e}")))?;
        Ok(())
    }
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let due_at: String = row.get(2)?;
    let status: String = row.get(3)?;
    let mode: Option<String> = row.get(7)?;
    let delay_unit: Option<String> = row.get(9)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        due_at: parse_ts(&due_at),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Scheduled),
        last_error: row.get(4)?,
        context_email_id: row.get(5)?,
        generated_email_id: row.get(6)?,
        mode: mode
            .as_deref()
            .and_then(ScheduleMode::parse)
            .unwrap_or(ScheduleMode::Simple),
        delay_value: row.get(8)?,
        delay_unit: delay_unit.as_deref().and_then(DelayUnit::parse),
        cron_expression: row.get(10)?,
        attempts: row.get(11)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use salesloop_core::types::EmailDraft;

    fn seed(store: &Store) -> (i64, i64) {
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        let email_id = store
            .insert_email_draft(
                customer_id,
                "initial",
                &EmailDraft {
                    subject: "Hello".into(),
                    body: "Intro".into(),
                },
                "sent",
            )
            .unwrap();
        (customer_id, email_id)
    }

    fn simple_task(customer_id: i64, email_id: i64, due_at: DateTime<Utc>) -> NewScheduledTask {
        NewScheduledTask {
            customer_id,
            context_email_id: email_id,
            due_at,
            mode: ScheduleMode::Simple,
            delay_value: 3,
            delay_unit: Some(DelayUnit::Days),
            cron_expression: None,
        }
    }

    #[test]
    fn create_and_get_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let (customer_id, email_id) = seed(&store);
        let due = Utc::now() + Duration::days(3);
        let task_id = store
            .create_task(&simple_task(customer_id, email_id, due))
            .unwrap();

        let task = store.get_task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.mode, ScheduleMode::Simple);
        assert_eq!(task.delay_unit, Some(DelayUnit::Days));
        assert_eq!(task.attempts, 0);
        assert!((task.due_at - due).num_seconds().abs() < 2);
    }

    #[test]
    fn get_unknown_task_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.get_task(99),
            Err(SalesloopError::NotFound(_))
        ));
    }

    #[test]
    fn due_tasks_returns_only_ripe_rows_in_order() {
        let store = Store::open_in_memory().unwrap();
        let (customer_id, email_id) = seed(&store);
        let past_far = store
            .create_task(&simple_task(
                customer_id,
                email_id,
                Utc::now() - Duration::hours(2),
            ))
            .unwrap();
        let past_near = store
            .create_task(&simple_task(
                customer_id,
                email_id,
                Utc::now() - Duration::minutes(5),
            ))
            .unwrap();
        store
            .create_task(&simple_task(
                customer_id,
                email_id,
                Utc::now() + Duration::days(1),
            ))
            .unwrap();

        let due = store.due_tasks(10).unwrap();
        let ids: Vec<i64> = due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![past_far, past_near]);
    }

    #[test]
    fn claim_is_compare_and_swap() {
        let store = Store::open_in_memory().unwrap();
        let (customer_id, email_id) = seed(&store);
        let task_id = store
            .create_task(&simple_task(customer_id, email_id, Utc::now()))
            .unwrap();

        store.claim_task(task_id).unwrap();
        let err = store.claim_task(task_id).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get_task(task_id).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn reschedule_requeues_with_attempts_and_error() {
        let store = Store::open_in_memory().unwrap();
        let (customer_id, email_id) = seed(&store);
        let task_id = store
            .create_task(&simple_task(customer_id, email_id, Utc::now()))
            .unwrap();
        store.claim_task(task_id).unwrap();

        let due = Utc::now() + Duration::minutes(10);
        store
            .reschedule_task(task_id, due, 1, "smtp refused")
            .unwrap();

        let task = store.get_task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.last_error.as_deref(), Some("smtp refused"));
        assert!((task.due_at - due).num_seconds().abs() < 2);
    }

    #[test]
    fn finalize_records_generated_email() {
        let store = Store::open_in_memory().unwrap();
        let (customer_id, email_id) = seed(&store);
        let task_id = store
            .create_task(&simple_task(customer_id, email_id, Utc::now()))
            .unwrap();
        store.claim_task(task_id).unwrap();
        store
            .finalize_task(task_id, TaskStatus::Sent, Some(email_id), None)
            .unwrap();

        let task = store.get_task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Sent);
        assert_eq!(task.generated_email_id, Some(email_id));
        // A sent task is never due again.
        assert!(store.due_tasks(10).unwrap().is_empty());
    }

    #[test]
    fn latest_task_prefers_recent_updates() {
        let store = Store::open_in_memory().unwrap();
        let (customer_id, email_id) = seed(&store);
        store
            .create_task(&simple_task(customer_id, email_id, Utc::now()))
            .unwrap();
        let second = store
            .create_task(&simple_task(customer_id, email_id, Utc::now()))
            .unwrap();

        let latest = store.latest_task(customer_id).unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert!(store.latest_task(customer_id + 100).is_ok());
    }
}
