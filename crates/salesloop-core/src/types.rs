//! Domain types for automation jobs and scheduled follow-up tasks.
//!
//! Enum values round-trip through their SQLite TEXT representation via
//! `as_str`/`parse`; unknown stored values fall back to the initial state
//! rather than failing a whole row scan.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Status of an automation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Pipeline stage of an automation job. Persisted before each collaborator
/// call, so a crash mid-stage leaves an accurate (if stale) marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Pending,
    Grading,
    Analysis,
    Email,
    Followup,
    Completed,
    Stopped,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Grading => "grading",
            Self::Analysis => "analysis",
            Self::Email => "email",
            Self::Followup => "followup",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "grading" => Some(Self::Grading),
            "analysis" => Some(Self::Analysis),
            "email" => Some(Self::Email),
            "followup" => Some(Self::Followup),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// A per-customer automation workflow row.
///
/// Only `failed` rows survive long-term; completed and stopped jobs are
/// deleted right after finalization, so the table holds failed or in-flight
/// work only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationJob {
    pub id: i64,
    pub customer_id: i64,
    pub status: JobStatus,
    pub stage: JobStage,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a scheduled follow-up task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Sent,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "running" => Some(Self::Running),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// How the due time of a task was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Fixed delay from "now" (value + unit).
    Simple,
    /// Next occurrence of a cron expression.
    Cron,
}

impl ScheduleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Self::Simple),
            "cron" => Some(Self::Cron),
            _ => None,
        }
    }
}

/// Delay unit for simple-mode scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minutes" => Some(Self::Minutes),
            "hours" => Some(Self::Hours),
            "days" => Some(Self::Days),
            _ => None,
        }
    }

    /// Normalize a free-form unit string; anything unrecognized means days.
    pub fn normalize(s: Option<&str>) -> Self {
        s.map(str::trim)
            .and_then(Self::parse)
            .unwrap_or(Self::Days)
    }

    /// Delay as a duration, or `None` when the value is out of range for
    /// the unit.
    pub fn duration(&self, value: i64) -> Option<Duration> {
        match self {
            Self::Minutes => Duration::try_minutes(value),
            Self::Hours => Duration::try_hours(value),
            Self::Days => Duration::try_days(value),
        }
    }
}

/// A persisted follow-up task.
///
/// `context_email_id` points at the email that justifies the follow-up;
/// `generated_email_id` at the follow-up actually produced and sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub customer_id: i64,
    pub context_email_id: i64,
    pub generated_email_id: Option<i64>,
    pub due_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub mode: ScheduleMode,
    pub delay_value: i64,
    pub delay_unit: Option<DelayUnit>,
    pub cron_expression: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A customer contact. Key contacts are preferred recipients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub is_key: bool,
}

/// A generated outbound email body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
}

/// A draft that has already been persisted as an email row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftedEmail {
    pub email_id: i64,
    pub subject: String,
    pub body: String,
}

/// A stored email row, as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: i64,
    pub customer_id: i64,
    pub kind: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// AI grade recommendation for a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeSuggestion {
    pub grade: String,
    #[serde(default)]
    pub reason: String,
}

/// Request to schedule a follow-up task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub customer_id: i64,
    pub context_email_id: i64,
    /// Defaults to simple when unspecified.
    #[serde(default)]
    pub mode: Option<ScheduleMode>,
    #[serde(default)]
    pub delay_value: i64,
    /// Free-form; normalized to minutes/hours/days (default days).
    #[serde(default)]
    pub delay_unit: Option<String>,
    #[serde(default)]
    pub cron_expression: Option<String>,
}

/// Task id, due time, and the normalized scheduling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub task_id: i64,
    pub due_at: DateTime<Utc>,
    pub mode: ScheduleMode,
    pub delay_value: i64,
    pub delay_unit: Option<DelayUnit>,
    pub cron_expression: Option<String>,
}

/// Persisted application settings the orchestration reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Fallback recipient when a customer has no contact emails.
    #[serde(default)]
    pub admin_email: String,
    /// Grade a customer must reach for automation to proceed past grading.
    #[serde(default)]
    pub automation_required_grade: String,
    /// Default follow-up delay in days.
    #[serde(default)]
    pub automation_followup_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_email: String::new(),
            automation_required_grade: "A".into(),
            automation_followup_days: 3,
        }
    }
}

impl Settings {
    /// Required grade with legacy normalization: blank means `A`, and the
    /// retired `S` tier maps onto `A`.
    pub fn required_grade(&self) -> String {
        let grade = self.automation_required_grade.trim().to_uppercase();
        if grade.is_empty() || grade == "S" {
            "A".into()
        } else {
            grade
        }
    }

    /// Follow-up delay in days, with the non-positive values defaulted.
    pub fn followup_days(&self) -> i64 {
        if self.automation_followup_days <= 0 {
            3
        } else {
            self.automation_followup_days
        }
    }
}
