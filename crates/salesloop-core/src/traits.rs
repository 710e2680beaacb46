//! Collaborator contracts the orchestration delegates to.
//!
//! Real implementations (LLM-backed grading/analysis/drafting, SMTP
//! delivery) live outside this workspace. The `Unconfigured*` types mirror
//! the stub bundle the daemon boots with before collaborators are wired in:
//! every call fails with a tagged external-service error.

use async_trait::async_trait;

use crate::error::{Result, SalesloopError};
use crate::types::{DraftedEmail, EmailDraft, GradeSuggestion, ScheduleRequest, ScheduleResponse};

/// Evaluates customers and records the confirmed grade.
#[async_trait]
pub trait Grading: Send + Sync {
    async fn suggest(&self, customer_id: i64) -> Result<GradeSuggestion>;
    async fn confirm(&self, customer_id: i64, grade: &str, reason: &str) -> Result<()>;
}

/// Builds the customer analysis report (persisted as a side effect).
#[async_trait]
pub trait Analysis: Send + Sync {
    async fn generate(&self, customer_id: i64) -> Result<()>;
}

/// Drafts outbound emails.
#[async_trait]
pub trait EmailComposer: Send + Sync {
    /// Draft and persist the initial outreach email; returns the stored row.
    async fn draft_initial(&self, customer_id: i64) -> Result<DraftedEmail>;
    /// Draft a follow-up using the context email as prior conversation.
    async fn draft_followup(&self, customer_id: i64, context_email_id: i64) -> Result<EmailDraft>;
}

/// Delivers an email and returns the provider message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<String>;
}

/// Entry point the automation engine uses to create follow-up tasks.
#[async_trait]
pub trait FollowupScheduling: Send + Sync {
    async fn schedule(&self, req: &ScheduleRequest) -> Result<ScheduleResponse>;
}

fn unconfigured(phase: &str) -> SalesloopError {
    SalesloopError::external(phase, "collaborator not configured")
}

pub struct UnconfiguredGrading;

#[async_trait]
impl Grading for UnconfiguredGrading {
    async fn suggest(&self, _customer_id: i64) -> Result<GradeSuggestion> {
        Err(unconfigured("grading"))
    }

    async fn confirm(&self, _customer_id: i64, _grade: &str, _reason: &str) -> Result<()> {
        Err(unconfigured("grading"))
    }
}

pub struct UnconfiguredAnalysis;

#[async_trait]
impl Analysis for UnconfiguredAnalysis {
    async fn generate(&self, _customer_id: i64) -> Result<()> {
        Err(unconfigured("analysis"))
    }
}

pub struct UnconfiguredComposer;

#[async_trait]
impl EmailComposer for UnconfiguredComposer {
    async fn draft_initial(&self, _customer_id: i64) -> Result<DraftedEmail> {
        Err(unconfigured("email"))
    }

    async fn draft_followup(&self, _customer_id: i64, _context_email_id: i64) -> Result<EmailDraft> {
        Err(unconfigured("email"))
    }
}

pub struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, _to: &[String], _subject: &str, _body: &str) -> Result<String> {
        Err(unconfigured("send"))
    }
}
