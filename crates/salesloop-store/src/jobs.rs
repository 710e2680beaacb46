//! Automation job persistence: create, claim, stage updates, finalization.

use rusqlite::{params, Connection, OptionalExtension};

use salesloop_core::error::{Result, SalesloopError};
use salesloop_core::types::{AutomationJob, JobStage, JobStatus};

use crate::{now_text, parse_ts, parse_ts_opt, Store};

const JOB_COLUMNS: &str =
    "id, customer_id, status, stage, last_error, started_at, finished_at, created_at, updated_at";

impl Store {
    /// Insert a new job at stage `pending`, status `queued`.
    pub fn create_job(&self, customer_id: i64) -> Result<AutomationJob> {
        if customer_id <= 0 {
            return Err(SalesloopError::Validation("invalid customer id".into()));
        }
        let conn = self.lock()?;
        let now = now_text();
        conn.execute(
            "INSERT INTO automation_jobs (customer_id, status, stage, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                customer_id,
                JobStatus::Queued.as_str(),
                JobStage::Pending.as_str(),
                now
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("create job: {e}")))?;
        let id = conn.last_insert_rowid();
        job_by_id(&conn, id)
    }

    /// Full job detail by id.
    pub fn get_job(&self, job_id: i64) -> Result<AutomationJob> {
        let conn = self.lock()?;
        job_by_id(&conn, job_id)
    }

    /// Latest queued or running job for a customer, if any.
    pub fn active_job(&self, customer_id: i64) -> Result<Option<AutomationJob>> {
        if customer_id <= 0 {
            return Err(SalesloopError::Validation("invalid customer id".into()));
        }
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM automation_jobs
                     WHERE customer_id = ?1 AND status IN (?2, ?3)
                     ORDER BY id DESC LIMIT 1"
                ),
                params![
                    customer_id,
                    JobStatus::Queued.as_str(),
                    JobStatus::Running.as_str()
                ],
                job_from_row,
            )
            .optional()
            .map_err(|e| SalesloopError::Store(format!("query active job: {e}")))?;
        Ok(job)
    }

    /// Atomically claim the oldest queued job and move it to running.
    ///
    /// The claim is a conditional update inside a transaction, checked by
    /// rows-affected: concurrent callers claim disjoint jobs or none.
    /// Returns `None` when the queue is empty or the row was taken first.
    pub fn claim_next_job(&self) -> Result<Option<AutomationJob>> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| SalesloopError::Store(format!("begin claim: {e}")))?;

        let job_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM automation_jobs WHERE status = ?1 ORDER BY id ASC LIMIT 1",
                params![JobStatus::Queued.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SalesloopError::Store(format!("find queued job: {e}")))?;
        let Some(job_id) = job_id else {
            return Ok(None);
        };

        let now = now_text();
        let affected = tx
            .execute(
                "UPDATE automation_jobs
                 SET status = ?1,
                     stage = CASE WHEN stage = ?2 THEN ?3 ELSE stage END,
                     started_at = COALESCE(started_at, ?4),
                     updated_at = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    JobStatus::Running.as_str(),
                    JobStage::Pending.as_str(),
                    JobStage::Grading.as_str(),
                    now,
                    job_id,
                    JobStatus::Queued.as_str()
                ],
            )
            .map_err(|e| SalesloopError::Store(format!("claim job: {e}")))?;
        if affected == 0 {
            return Ok(None);
        }
        tx.commit()
            .map_err(|e| SalesloopError::Store(format!("commit claim: {e}")))?;

        job_by_id(&conn, job_id).map(Some)
    }

    /// Persist the stage the job is about to enter.
    pub fn update_job_stage(&self, job_id: i64, stage: JobStage) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE automation_jobs SET stage = ?1, updated_at = ?2 WHERE id = ?3",
            params![stage.as_str(), now_text(), job_id],
        )
        .map_err(|e| SalesloopError::Store(format!("update job stage: {e}")))?;
        Ok(())
    }

    pub fn mark_job_completed(&self, job_id: i64) -> Result<()> {
        let conn = self.lock()?;
        let now = now_text();
        conn.execute(
            "UPDATE automation_jobs
             SET status = ?1, stage = ?2, finished_at = COALESCE(finished_at, ?3), updated_at = ?3
             WHERE id = ?4",
            params![
                JobStatus::Completed.as_str(),
                JobStage::Completed.as_str(),
                now,
                job_id
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("mark job completed: {e}")))?;
        Ok(())
    }

    /// Terminal non-failure end: the pipeline stopped on purpose (grade gate,
    /// missing configuration). The reason lands in `last_error` for display.
    pub fn mark_job_stopped(&self, job_id: i64, reason: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = now_text();
        conn.execute(
            "UPDATE automation_jobs
             SET status = ?1, stage = ?2, last_error = ?3,
                 finished_at = COALESCE(finished_at, ?4), updated_at = ?4
             WHERE id = ?5",
            params![
                JobStatus::Completed.as_str(),
                JobStage::Stopped.as_str(),
                reason.trim(),
                now,
                job_id
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("mark job stopped: {e}")))?;
        Ok(())
    }

    /// Record a stage failure. The row is retained for diagnostics.
    pub fn mark_job_failed(&self, job_id: i64, stage: JobStage, message: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = now_text();
        conn.execute(
            "UPDATE automation_jobs
             SET status = ?1, stage = ?2, last_error = ?3,
                 finished_at = COALESCE(finished_at, ?4), updated_at = ?4
             WHERE id = ?5",
            params![
                JobStatus::Failed.as_str(),
                stage.as_str(),
                message.trim(),
                now,
                job_id
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("mark job failed: {e}")))?;
        Ok(())
    }

    /// Remove a finalized job row. Completed and stopped jobs do not linger.
    pub fn delete_job(&self, job_id: i64) -> Result<()> {
        if job_id <= 0 {
            return Ok(());
        }
        let conn = self.lock()?;
        conn.execute("DELETE FROM automation_jobs WHERE id = ?1", params![job_id])
            .map_err(|e| SalesloopError::Store(format!("delete job: {e}")))?;
        Ok(())
    }

    /// All job rows, oldest first.
    pub fn list_jobs(&self) -> Result<Vec<AutomationJob>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM automation_jobs ORDER BY id ASC"
            ))
            .map_err(|e| SalesloopError::Store(format!("list jobs: {e}")))?;
        let jobs = stmt
            .query_map([], job_from_row)
            .map_err(|e| SalesloopError::Store(format!("list jobs: {e}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| SalesloopError::Store(format!("scan jobs: {e}")))?;
        Ok(jobs)
    }
}

fn job_by_id(conn: &Connection, job_id: i64) -> Result<AutomationJob> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM automation_jobs WHERE id = ?1"),
        params![job_id],
        job_from_row,
    )
    .optional()
    .map_err(|e| SalesloopError::Store(format!("query job: {e}")))?
    .ok_or_else(|| SalesloopError::NotFound(format!("automation job {job_id}")))
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AutomationJob> {
    let status: String = row.get(2)?;
    let stage: String = row.get(3)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(AutomationJob {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Queued),
        stage: JobStage::parse(&stage).unwrap_or(JobStage::Pending),
        last_error: row.get(4)?,
        started_at: parse_ts_opt(row.get(5)?),
        finished_at: parse_ts_opt(row.get(6)?),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}
