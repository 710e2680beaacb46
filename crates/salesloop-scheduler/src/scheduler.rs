//! Schedule creation and task execution.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use salesloop_core::error::{Result, SalesloopError};
use salesloop_core::traits::{EmailComposer, FollowupScheduling, Mailer};
use salesloop_core::types::{
    DelayUnit, ScheduleMode, ScheduleRequest, ScheduleResponse, ScheduledTask, TaskStatus,
};
use salesloop_store::{NewScheduledTask, Store};

use crate::cron::CronSchedule;

/// Retries permitted before a task is failed permanently.
const MAX_ATTEMPTS: i64 = 3;

/// Creates follow-up tasks and executes them when due.
pub struct FollowupScheduler {
    store: Arc<Store>,
    composer: Arc<dyn EmailComposer>,
    mailer: Arc<dyn Mailer>,
    send_timeout: StdDuration,
}

impl FollowupScheduler {
    pub fn new(
        store: Arc<Store>,
        composer: Arc<dyn EmailComposer>,
        mailer: Arc<dyn Mailer>,
        send_timeout: StdDuration,
    ) -> Self {
        Self {
            store,
            composer,
            mailer,
            send_timeout,
        }
    }

    /// Validate a request, compute its due time, and persist the task.
    ///
    /// Recipient reachability is checked before the row is created; a task
    /// that could never send is rejected up front.
    pub fn schedule(&self, req: &ScheduleRequest) -> Result<ScheduleResponse> {
        if req.customer_id <= 0 || req.context_email_id <= 0 {
            return Err(SalesloopError::Validation(
                "customer id and context email id are required".into(),
            ));
        }

        let now = Utc::now();
        let mode = req.mode.unwrap_or(ScheduleMode::Simple);
        let (due_at, delay_value, delay_unit, cron_expression) = match mode {
            ScheduleMode::Simple => {
                let unit = DelayUnit::normalize(req.delay_unit.as_deref());
                let value = if req.delay_value <= 0 {
                    3
                } else {
                    req.delay_value
                };
                let due = unit
                    .duration(value)
                    .and_then(|delay| now.checked_add_signed(delay))
                    .ok_or_else(|| {
                        SalesloopError::Validation(format!(
                            "delay of {value} {} is out of range",
                            unit.as_str()
                        ))
                    })?;
                (due, value, Some(unit), None)
            }
            ScheduleMode::Cron => {
                let expr = req
                    .cron_expression
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| {
                        SalesloopError::Validation("cron mode requires an expression".into())
                    })?;
                let due = CronSchedule::parse(expr)?.next_after(now).ok_or_else(|| {
                    SalesloopError::Validation(format!(
                        "cron expression '{expr}' yields no future occurrence"
                    ))
                })?;
                (due, 0, None, Some(expr.to_string()))
            }
        };

        self.resolve_recipients(req.customer_id)?;

        let task_id = self.store.create_task(&NewScheduledTask {
            customer_id: req.customer_id,
            context_email_id: req.context_email_id,
            due_at,
            mode,
            delay_value,
            delay_unit,
            cron_expression: cron_expression.clone(),
        })?;
        info!(
            task_id,
            customer_id = req.customer_id,
            due_at = %due_at,
            mode = mode.as_str(),
            "📅 Follow-up task created"
        );
        Ok(ScheduleResponse {
            task_id,
            due_at,
            mode,
            delay_value,
            delay_unit,
            cron_expression,
        })
    }

    /// Claim and execute one task immediately.
    ///
    /// Send failures are absorbed into the retry ladder and still return
    /// `Ok`; an `Err` means the task could not be claimed (unknown id or
    /// lost race) or the store misbehaved.
    pub async fn run_now(&self, task_id: i64) -> Result<()> {
        let task = self.store.get_task(task_id)?;
        self.store.claim_task(task_id)?;

        match self.execute(&task).await {
            Ok(email_id) => {
                self.store
                    .finalize_task(task_id, TaskStatus::Sent, Some(email_id), None)?;
                info!(task_id, email_id, "📬 Follow-up sent");
                if task.mode == ScheduleMode::Cron {
                    self.chain_next_occurrence(&task);
                }
                Ok(())
            }
            Err(e) => self.reschedule(&task, &e),
        }
    }

    async fn execute(&self, task: &ScheduledTask) -> Result<i64> {
        let recipients = self.resolve_recipients(task.customer_id)?;
        let draft = self
            .composer
            .draft_followup(task.customer_id, task.context_email_id)
            .await?;
        let email_id =
            self.store
                .insert_email_draft(task.customer_id, "followup", &draft, "draft")?;

        let message_id = match tokio::time::timeout(
            self.send_timeout,
            self.mailer.send(&recipients, &draft.subject, &draft.body),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(SalesloopError::external(
                    "send",
                    format!("timed out after {}s", self.send_timeout.as_secs()),
                ))
            }
        };

        self.store.update_email_sent(email_id, &message_id)?;
        Ok(email_id)
    }

    /// Key contacts first, then the rest, de-duplicated case-insensitively;
    /// the administrator email is the fallback of last resort.
    fn resolve_recipients(&self, customer_id: i64) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        for contact in self.store.list_contacts(customer_id)? {
            let email = contact.email.trim();
            if email.is_empty() {
                continue;
            }
            if seen.insert(email.to_lowercase()) {
                recipients.push(email.to_string());
            }
        }
        if recipients.is_empty() {
            let settings = self.store.get_settings()?;
            let admin = settings.admin_email.trim();
            if admin.is_empty() {
                return Err(SalesloopError::NoRecipients);
            }
            recipients.push(admin.to_string());
        }
        Ok(recipients)
    }

    /// Back off and re-queue, or fail permanently past the attempt cap.
    fn reschedule(&self, task: &ScheduledTask, err: &SalesloopError) -> Result<()> {
        let next_attempt = task.attempts + 1;
        if next_attempt > MAX_ATTEMPTS {
            warn!(
                task_id = task.id,
                attempts = task.attempts,
                "❌ Follow-up failed permanently: {err}"
            );
            return self.store.finalize_task(
                task.id,
                TaskStatus::Failed,
                None,
                Some(&err.to_string()),
            );
        }
        let due_at = Utc::now() + backoff_delay(next_attempt);
        warn!(
            task_id = task.id,
            attempt = next_attempt,
            retry_at = %due_at,
            "🔁 Follow-up attempt failed, backing off: {err}"
        );
        self.store
            .reschedule_task(task.id, due_at, next_attempt, &err.to_string())
    }

    /// After a successful cron-mode send, line up the next occurrence as a
    /// fresh row. Problems here are logged only; the send already counted.
    fn chain_next_occurrence(&self, task: &ScheduledTask) {
        let Some(expr) = task.cron_expression.as_deref() else {
            warn!(task_id = task.id, "cron task has no expression, not chained");
            return;
        };
        let next = CronSchedule::parse(expr)
            .ok()
            .and_then(|s| s.next_after(Utc::now()));
        let Some(due_at) = next else {
            warn!(task_id = task.id, expr, "no next cron occurrence, not chained");
            return;
        };
        let created = self.store.create_task(&NewScheduledTask {
            customer_id: task.customer_id,
            context_email_id: task.context_email_id,
            due_at,
            mode: ScheduleMode::Cron,
            delay_value: 0,
            delay_unit: None,
            cron_expression: Some(expr.to_string()),
        });
        match created {
            Ok(next_id) => info!(
                task_id = task.id,
                next_id,
                due_at = %due_at,
                "🔗 Next cron occurrence queued"
            ),
            Err(e) => warn!(task_id = task.id, "could not chain cron task: {e}"),
        }
    }

    pub(crate) fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

/// Backoff by attempt number: 10 minutes, then 1 hour, then 6 hours.
fn backoff_delay(attempt: i64) -> Duration {
    match attempt {
        1 => Duration::minutes(10),
        2 => Duration::hours(1),
        _ => Duration::hours(6),
    }
}

#[async_trait]
impl FollowupScheduling for FollowupScheduler {
    async fn schedule(&self, req: &ScheduleRequest) -> Result<ScheduleResponse> {
        FollowupScheduler::schedule(self, req)
    }
}
