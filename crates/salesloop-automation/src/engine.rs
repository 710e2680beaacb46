//! The staged per-customer pipeline and its queue operations.

use std::sync::Arc;

use tracing::{info, warn};

use salesloop_core::error::{Result, SalesloopError};
use salesloop_core::traits::{Analysis, EmailComposer, FollowupScheduling, Grading};
use salesloop_core::types::{AutomationJob, JobStage, ScheduleRequest};
use salesloop_store::Store;

/// Drives queued automation jobs through the outreach pipeline.
pub struct AutomationEngine {
    store: Arc<Store>,
    grader: Arc<dyn Grading>,
    analyst: Arc<dyn Analysis>,
    composer: Arc<dyn EmailComposer>,
    scheduler: Arc<dyn FollowupScheduling>,
}

impl AutomationEngine {
    pub fn new(
        store: Arc<Store>,
        grader: Arc<dyn Grading>,
        analyst: Arc<dyn Analysis>,
        composer: Arc<dyn EmailComposer>,
        scheduler: Arc<dyn FollowupScheduling>,
    ) -> Self {
        Self {
            store,
            grader,
            analyst,
            composer,
            scheduler,
        }
    }

    /// Queue a job for a customer and nudge the queue in the background.
    ///
    /// The active-job check and the insert are separate statements; two
    /// racing enqueues can both pass the check. The claim step still runs
    /// each inserted job exactly once.
    pub async fn enqueue(self: &Arc<Self>, customer_id: i64) -> Result<AutomationJob> {
        if customer_id <= 0 {
            return Err(SalesloopError::Validation("invalid customer id".into()));
        }
        if let Some(active) = self.store.active_job(customer_id)? {
            return Err(SalesloopError::Conflict(format!(
                "automation job {} already active for customer {customer_id}",
                active.id
            )));
        }
        let job = self.store.create_job(customer_id)?;
        info!(
            job_id = job.id,
            customer_id, "🤖 Automation job queued, waking queue"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.process_next().await {
                warn!("automation wakeup failed: {e}");
            }
        });
        Ok(job)
    }

    /// Claim and run the oldest queued job.
    ///
    /// Returns `Ok(false)` when the queue is empty. A job whose pipeline
    /// fails is marked failed and still yields `Ok(true)`, so a draining
    /// caller keeps going; only claim/store errors surface as `Err`.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(job) = self.store.claim_next_job()? else {
            return Ok(false);
        };
        info!(
            job_id = job.id,
            customer_id = job.customer_id,
            "⚙️ Processing automation job"
        );
        if let Err(e) = self.run_job(&job).await {
            warn!(job_id = job.id, "automation job bookkeeping failed: {e}");
            let stage = self
                .store
                .get_job(job.id)
                .map(|j| j.stage)
                .unwrap_or(job.stage);
            if let Err(mark) = self.store.mark_job_failed(job.id, stage, &e.to_string()) {
                warn!(job_id = job.id, "could not record job failure: {mark}");
            }
        }
        Ok(true)
    }

    /// Walk one claimed job through the pipeline.
    ///
    /// Collaborator failures finalize the job (failed or stopped) and return
    /// `Ok`; an `Err` here means the store itself misbehaved.
    async fn run_job(&self, job: &AutomationJob) -> Result<()> {
        let customer_id = job.customer_id;
        let settings = self.store.get_settings()?;

        // Stage: grading. The claim already moved the stage marker here.
        let suggestion = match self.grader.suggest(customer_id).await {
            Ok(s) => s,
            Err(e) => return self.fail(job.id, JobStage::Grading, &e),
        };
        let mut grade = suggestion.grade.trim().to_uppercase();
        if grade.is_empty() {
            grade = "C".into();
        }
        // The grade is confirmed on the customer record whether or not it
        // clears the bar; the gate only decides if automation continues.
        if let Err(e) = self
            .grader
            .confirm(customer_id, &grade, suggestion.reason.trim())
            .await
        {
            return self.fail(job.id, JobStage::Grading, &e);
        }
        let required = settings.required_grade();
        if grade != required {
            info!(
                job_id = job.id,
                customer_id, %grade, %required, "⏹️ Grade below automation bar, stopping"
            );
            return self.stop(
                job.id,
                &format!("customer graded {grade}, automation requires {required}"),
            );
        }

        // Stage: analysis.
        self.store.update_job_stage(job.id, JobStage::Analysis)?;
        if let Err(e) = self.analyst.generate(customer_id).await {
            return self.fail(job.id, JobStage::Analysis, &e);
        }

        // Stage: initial email.
        self.store.update_job_stage(job.id, JobStage::Email)?;
        let drafted = match self.composer.draft_initial(customer_id).await {
            Ok(d) => d,
            Err(e) => return self.fail(job.id, JobStage::Email, &e),
        };
        if drafted.email_id <= 0 {
            return self.fail(
                job.id,
                JobStage::Email,
                &SalesloopError::external("email", "draft was not persisted"),
            );
        }

        // Stage: follow-up. Bookkeeping first, once per customer.
        self.store.update_job_stage(job.id, JobStage::Followup)?;
        if self.store.latest_followup_id(customer_id)?.is_none() {
            self.store.save_initial_followup(
                customer_id,
                drafted.email_id,
                "created by automation",
            )?;
        }
        // Any prior task row, whatever its outcome, means a follow-up was
        // already arranged for this customer; do not schedule another.
        if self.store.latest_task(customer_id)?.is_some() {
            info!(job_id = job.id, customer_id, "Follow-up task already exists, skipping");
            self.store.mark_job_completed(job.id)?;
            self.store.delete_job(job.id)?;
            return Ok(());
        }
        let request = ScheduleRequest {
            customer_id,
            context_email_id: drafted.email_id,
            mode: None,
            delay_value: settings.followup_days(),
            delay_unit: Some("days".into()),
            cron_expression: None,
        };
        match self.scheduler.schedule(&request).await {
            Ok(response) => {
                info!(
                    job_id = job.id,
                    customer_id,
                    task_id = response.task_id,
                    due_at = %response.due_at,
                    "📅 Follow-up scheduled"
                );
            }
            Err(e) if e.is_no_recipients() => {
                info!(job_id = job.id, customer_id, "⏹️ No recipients, stopping");
                return self.stop(job.id, &e.to_string());
            }
            Err(e) => return self.fail(job.id, JobStage::Followup, &e),
        }

        self.store.mark_job_completed(job.id)?;
        self.store.delete_job(job.id)?;
        info!(job_id = job.id, customer_id, "✅ Automation job completed");
        Ok(())
    }

    fn fail(&self, job_id: i64, stage: JobStage, err: &SalesloopError) -> Result<()> {
        warn!(job_id, stage = stage.as_str(), "❌ Automation job failed: {err}");
        self.store.mark_job_failed(job_id, stage, &err.to_string())
    }

    /// Deliberate non-failure end: finalize, then drop the row.
    fn stop(&self, job_id: i64, reason: &str) -> Result<()> {
        self.store.mark_job_stopped(job_id, reason)?;
        self.store.delete_job(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use salesloop_core::types::{
        DraftedEmail, EmailDraft, GradeSuggestion, ScheduleMode, ScheduleResponse, Settings,
        TaskStatus,
    };

    struct FixedGrading {
        grade: &'static str,
        confirmed: AtomicUsize,
    }

    impl FixedGrading {
        fn new(grade: &'static str) -> Arc<Self> {
            Arc::new(Self {
                grade,
                confirmed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Grading for FixedGrading {
        async fn suggest(&self, _customer_id: i64) -> Result<GradeSuggestion> {
            Ok(GradeSuggestion {
                grade: self.grade.into(),
                reason: "strong fit".into(),
            })
        }

        async fn confirm(&self, _customer_id: i64, _grade: &str, _reason: &str) -> Result<()> {
            self.confirmed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StuckGrading;

    #[async_trait]
    impl Grading for StuckGrading {
        async fn suggest(&self, _customer_id: i64) -> Result<GradeSuggestion> {
            // Park forever; the job stays running for the whole test.
            futures_never().await
        }

        async fn confirm(&self, _customer_id: i64, _grade: &str, _reason: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn futures_never() -> Result<GradeSuggestion> {
        std::future::pending::<()>().await;
        unreachable!()
    }

    struct CountingAnalysis {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingAnalysis {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Analysis for CountingAnalysis {
        async fn generate(&self, _customer_id: i64) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SalesloopError::external("analysis", "model unavailable"))
            } else {
                Ok(())
            }
        }
    }

    struct StoreBackedComposer {
        store: Arc<Store>,
    }

    #[async_trait]
    impl EmailComposer for StoreBackedComposer {
        async fn draft_initial(&self, customer_id: i64) -> Result<DraftedEmail> {
            let draft = EmailDraft {
                subject: "Introducing Salesloop".into(),
                body: "Hello!".into(),
            };
            let email_id = self
                .store
                .insert_email_draft(customer_id, "initial", &draft, "draft")?;
            Ok(DraftedEmail {
                email_id,
                subject: draft.subject,
                body: draft.body,
            })
        }

        async fn draft_followup(
            &self,
            _customer_id: i64,
            _context_email_id: i64,
        ) -> Result<EmailDraft> {
            Err(SalesloopError::external("email", "not used here"))
        }
    }

    struct RecordingScheduler {
        requests: Mutex<Vec<ScheduleRequest>>,
        no_recipients: bool,
    }

    impl RecordingScheduler {
        fn new(no_recipients: bool) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                no_recipients,
            })
        }
    }

    #[async_trait]
    impl FollowupScheduling for RecordingScheduler {
        async fn schedule(&self, req: &ScheduleRequest) -> Result<ScheduleResponse> {
            self.requests.lock().unwrap().push(req.clone());
            if self.no_recipients {
                return Err(SalesloopError::NoRecipients);
            }
            Ok(ScheduleResponse {
                task_id: 1,
                due_at: Utc::now(),
                mode: ScheduleMode::Simple,
                delay_value: req.delay_value,
                delay_unit: None,
                cron_expression: None,
            })
        }
    }

    fn engine(
        store: &Arc<Store>,
        grader: Arc<dyn Grading>,
        analyst: Arc<dyn Analysis>,
        scheduler: Arc<dyn FollowupScheduling>,
    ) -> Arc<AutomationEngine> {
        Arc::new(AutomationEngine::new(
            Arc::clone(store),
            grader,
            analyst,
            Arc::new(StoreBackedComposer {
                store: Arc::clone(store),
            }),
            scheduler,
        ))
    }

    #[tokio::test]
    async fn happy_path_runs_every_stage_and_removes_job() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        let grading = FixedGrading::new("A");
        let analysis = CountingAnalysis::new(false);
        let scheduler = RecordingScheduler::new(false);
        let engine = engine(&store, grading.clone(), analysis.clone(), scheduler.clone());

        store.create_job(customer_id).unwrap();
        assert!(engine.process_next().await.unwrap());

        assert_eq!(grading.confirmed.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.calls.load(Ordering::SeqCst), 1);
        let requests = scheduler.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].customer_id, customer_id);
        assert_eq!(requests[0].delay_value, 3);
        // Follow-up bookkeeping exists, the job row does not.
        assert!(store.latest_followup_id(customer_id).unwrap().is_some());
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn grade_below_bar_stops_without_analysis() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        let grading = FixedGrading::new("C");
        let analysis = CountingAnalysis::new(false);
        let scheduler = RecordingScheduler::new(false);
        let engine = engine(&store, grading.clone(), analysis.clone(), scheduler.clone());

        store.create_job(customer_id).unwrap();
        assert!(engine.process_next().await.unwrap());

        // The grade lands on the customer record even when automation stops.
        assert_eq!(grading.confirmed.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.calls.load(Ordering::SeqCst), 0);
        assert!(scheduler.requests.lock().unwrap().is_empty());
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_suggested_grade_defaults_to_c_and_stops() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        let engine = engine(
            &store,
            FixedGrading::new(""),
            CountingAnalysis::new(false),
            RecordingScheduler::new(false),
        );

        store.create_job(customer_id).unwrap();
        assert!(engine.process_next().await.unwrap());
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lowered_grade_bar_lets_jobs_through() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        store
            .update_settings(&Settings {
                admin_email: String::new(),
                automation_required_grade: "b".into(),
                automation_followup_days: 7,
            })
            .unwrap();
        let scheduler = RecordingScheduler::new(false);
        let engine = engine(
            &store,
            FixedGrading::new("B"),
            CountingAnalysis::new(false),
            scheduler.clone(),
        );

        store.create_job(customer_id).unwrap();
        assert!(engine.process_next().await.unwrap());

        let requests = scheduler.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].delay_value, 7);
    }

    #[tokio::test]
    async fn prior_followup_task_short_circuits_scheduling() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
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
        // A finished follow-up still counts: re-enqueueing the customer must
        // not arrange a second one.
        let task_id = store
            .create_task(&salesloop_store::NewScheduledTask {
                customer_id,
                context_email_id: email_id,
                due_at: Utc::now() - chrono::Duration::days(1),
                mode: ScheduleMode::Simple,
                delay_value: 3,
                delay_unit: None,
                cron_expression: None,
            })
            .unwrap();
        store
            .finalize_task(task_id, TaskStatus::Sent, Some(email_id), None)
            .unwrap();
        let scheduler = RecordingScheduler::new(false);
        let engine = engine(
            &store,
            FixedGrading::new("A"),
            CountingAnalysis::new(false),
            scheduler.clone(),
        );

        store.create_job(customer_id).unwrap();
        assert!(engine.process_next().await.unwrap());

        assert!(scheduler.requests.lock().unwrap().is_empty());
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn analysis_failure_retains_failed_row() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        let engine = engine(
            &store,
            FixedGrading::new("A"),
            CountingAnalysis::new(true),
            RecordingScheduler::new(false),
        );

        let job = store.create_job(customer_id).unwrap();
        assert!(engine.process_next().await.unwrap());

        let failed = store.get_job(job.id).unwrap();
        assert_eq!(failed.status, salesloop_core::types::JobStatus::Failed);
        assert_eq!(failed.stage, JobStage::Analysis);
        assert!(failed
            .last_error
            .as_deref()
            .unwrap()
            .contains("model unavailable"));
    }

    #[tokio::test]
    async fn missing_recipients_stops_the_job() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        let engine = engine(
            &store,
            FixedGrading::new("A"),
            CountingAnalysis::new(false),
            RecordingScheduler::new(true),
        );

        store.create_job(customer_id).unwrap();
        assert!(engine.process_next().await.unwrap());
        // Stopped jobs are dropped, not kept as failures.
        assert!(store.list_jobs().unwrap().is_empty());
        assert!(store
            .list_tasks(Some(TaskStatus::Scheduled))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn enqueue_rejects_second_job_for_active_customer() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        let engine = engine(
            &store,
            Arc::new(StuckGrading),
            CountingAnalysis::new(false),
            RecordingScheduler::new(false),
        );

        engine.enqueue(customer_id).await.unwrap();
        let err = engine.enqueue(customer_id).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn concurrent_process_next_claims_exactly_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        store.create_job(customer_id).unwrap();
        let engine = engine(
            &store,
            FixedGrading::new("A"),
            CountingAnalysis::new(false),
            RecordingScheduler::new(false),
        );

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.process_next().await.unwrap()
            }));
        }
        let mut processed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                processed += 1;
            }
        }
        assert_eq!(processed, 1);
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn process_next_reports_empty_queue() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = engine(
            &store,
            FixedGrading::new("A"),
            CountingAnalysis::new(false),
            RecordingScheduler::new(false),
        );
        assert!(!engine.process_next().await.unwrap());
    }
}
