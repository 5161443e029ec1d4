use diesel::prelude::*;
use serde::Deserialize;
use crate::schema::{forms, form_submissions, form_submission_jobs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Intake,
    Conversion,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Intake => "intake",
            SubmissionKind::Conversion => "conversion",
        }
    }

    pub fn parse(s: &str) -> Option<SubmissionKind> {
        match s {
            "intake" => Some(SubmissionKind::Intake),
            "conversion" => Some(SubmissionKind::Conversion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    CtmConversion,
    EmailNotification,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::CtmConversion => "ctm_conversion",
            JobType::EmailNotification => "email_notification",
        }
    }

    pub fn parse(s: &str) -> Option<JobType> {
        match s {
            "ctm_conversion" => Some(JobType::CtmConversion),
            "email_notification" => Some(JobType::EmailNotification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead, // operator-assigned, never set by the engine
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

/// Subset of the stored form settings that drives side-effect fan-out.
/// Unknown keys in the settings bag are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormSettings {
    #[serde(default)]
    pub ctm_enabled: bool,
    #[serde(default)]
    pub ctm_five_star: bool,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    pub send_email_on_submission: Option<bool>,
}

impl FormSettings {
    pub fn parse(raw: &str) -> FormSettings {
        serde_json::from_str(raw).unwrap_or_default()
    }

    pub fn email_enabled(&self) -> bool {
        !self.notification_emails.is_empty() && self.send_email_on_submission != Some(false)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = forms)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Form {
    pub id: String,
    pub name: String,
    pub settings: String, // json bag, see FormSettings
    pub created_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = form_submissions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FormSubmission {
    pub id: String,
    pub form_id: String,
    pub form_version_id: String,
    pub submission_kind: String,
    pub encrypted_payload: Option<Vec<u8>>, // intake: opaque PHI ciphertext
    pub non_phi_payload: Option<String>,    // conversion: plain json
    pub attribution: Option<String>,        // utm set, referrer, landing page
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub embed_domain: Option<String>,
    pub ctm_sent: bool,
    pub ctm_sent_at: Option<i64>,
    pub email_sent: bool,
    pub email_sent_at: Option<i64>,
    pub created_at: i64,
}

impl FormSubmission {
    pub fn kind(&self) -> Option<SubmissionKind> {
        SubmissionKind::parse(&self.submission_kind)
    }
}

#[derive(Insertable)]
#[diesel(table_name = form_submissions)]
pub struct NewFormSubmission {
    pub id: String,
    pub form_id: String,
    pub form_version_id: String,
    pub submission_kind: String,
    pub encrypted_payload: Option<Vec<u8>>,
    pub non_phi_payload: Option<String>,
    pub attribution: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub embed_domain: Option<String>,
    pub ctm_sent: bool,
    pub email_sent: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = form_submission_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FormSubmissionJob {
    pub id: String,
    pub submission_id: String,
    pub job_type: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub idempotency_key: String, // deterministic, unique; absorbs duplicate enqueues
    pub scheduled_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl FormSubmissionJob {
    pub fn job_type(&self) -> Option<JobType> {
        JobType::parse(&self.job_type)
    }

    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }
}

#[derive(Insertable)]
#[diesel(table_name = form_submission_jobs)]
pub struct NewFormSubmissionJob {
    pub id: String,
    pub submission_id: String,
    pub job_type: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub idempotency_key: String,
    pub scheduled_at: i64,
    pub created_at: i64,
}
