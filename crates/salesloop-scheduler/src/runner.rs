//! Interval loop that executes due follow-up tasks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::FollowupScheduler;

/// Polls for due tasks and runs them, batch by batch, until none remain.
pub struct TaskRunner {
    scheduler: Arc<FollowupScheduler>,
    interval: Duration,
    batch_size: i64,
    shutdown: watch::Sender<bool>,
}

impl TaskRunner {
    pub fn new(scheduler: Arc<FollowupScheduler>, interval: Duration, batch_size: i64) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            scheduler,
            interval,
            batch_size,
            shutdown,
        }
    }

    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let interval = self.interval;
        let batch_size = self.batch_size;
        let mut shutdown = self.shutdown.subscribe();
        info!(interval_secs = interval.as_secs(), "⏰ Task runner started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        info!("🛑 Task runner stopping");
                        break;
                    }
                }
                drain_due(&scheduler, batch_size).await;
            }
        })
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Run every currently due task once.
///
/// A task that fails and gets rescheduled with a short backoff could show
/// up as due again within the same pass; the seen-set makes each id run at
/// most once per tick.
async fn drain_due(scheduler: &Arc<FollowupScheduler>, batch_size: i64) {
    let mut seen = HashSet::new();
    loop {
        let due = match scheduler.store().due_tasks(batch_size) {
            Ok(due) => due,
            Err(e) => {
                warn!("due-task query failed: {e}");
                return;
            }
        };
        let fresh: Vec<i64> = due
            .iter()
            .map(|t| t.id)
            .filter(|id| seen.insert(*id))
            .collect();
        if fresh.is_empty() {
            return;
        }
        for task_id in fresh {
            match scheduler.run_now(task_id).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    debug!(task_id, "task claimed elsewhere, skipping");
                }
                Err(e) => warn!(task_id, "task run failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    use salesloop_core::error::Result;
    use salesloop_core::traits::{EmailComposer, Mailer};
    use salesloop_core::types::{Contact, DraftedEmail, EmailDraft, ScheduleMode, TaskStatus};
    use salesloop_store::{NewScheduledTask, Store};

    struct StubComposer;

    #[async_trait]
    impl EmailComposer for StubComposer {
        async fn draft_initial(&self, _customer_id: i64) -> Result<DraftedEmail> {
            unreachable!("runner only drafts follow-ups")
        }

        async fn draft_followup(
            &self,
            _customer_id: i64,
            _context_email_id: i64,
        ) -> Result<EmailDraft> {
            Ok(EmailDraft {
                subject: "Re: Hi".into(),
                body: "Checking in".into(),
            })
        }
    }

    struct StubMailer;

    #[async_trait]
    impl Mailer for StubMailer {
        async fn send(&self, _to: &[String], _subject: &str, _body: &str) -> Result<String> {
            Ok("msg-1".into())
        }
    }

    #[tokio::test]
    async fn runner_sends_due_tasks_and_skips_future_ones() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        store
            .add_contact(
                customer_id,
                &Contact {
                    name: "A".into(),
                    email: "a@acme.test".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let email_id = store
            .insert_email_draft(
                customer_id,
                "initial",
                &EmailDraft {
                    subject: "Hi".into(),
                    body: "Intro".into(),
                },
                "sent",
            )
            .unwrap();
        let task = |offset: ChronoDuration| NewScheduledTask {
            customer_id,
            context_email_id: email_id,
            due_at: Utc::now() + offset,
            mode: ScheduleMode::Simple,
            delay_value: 3,
            delay_unit: None,
            cron_expression: None,
        };
        let due_id = store.create_task(&task(-ChronoDuration::minutes(1))).unwrap();
        let future_id = store.create_task(&task(ChronoDuration::days(1))).unwrap();

        let scheduler = Arc::new(FollowupScheduler::new(
            Arc::clone(&store),
            Arc::new(StubComposer),
            Arc::new(StubMailer),
            Duration::from_secs(5),
        ));
        let runner = TaskRunner::new(Arc::clone(&scheduler), Duration::from_millis(10), 5);
        let handle = runner.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        runner.stop();
        handle.await.unwrap();

        assert_eq!(store.get_task(due_id).unwrap().status, TaskStatus::Sent);
        assert_eq!(
            store.get_task(future_id).unwrap().status,
            TaskStatus::Scheduled
        );
    }
}
