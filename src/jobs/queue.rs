use std::sync::Arc;
use chrono::Utc;
use diesel::result::Error as DieselError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::crm::CrmClient;
use crate::api::email::{EmailSender, OutboundEmail};
use crate::jobs::handlers::{build_crm_payload, build_notification_email};
use crate::models::form_models::{
    FormSettings, FormSubmission, FormSubmissionJob, JobStatus, JobType, NewFormSubmissionJob,
};
use crate::repositories::form_job_repository::FormJobRepository;
use crate::utils::config::Config;

const CLAIM_BATCH_SIZE: i64 = 10;

/// Exponential backoff for a job that has failed `prior_attempts` times
/// already: base, 2x base, 4x base and so on.
pub fn backoff_delay_ms(base_ms: i64, prior_attempts: i32) -> i64 {
    base_ms.saturating_mul(1_i64 << prior_attempts.clamp(0, 20))
}

/// Deterministic idempotency keys for the two side-effect jobs a
/// submission can fan out into. Re-enqueueing the same submission reuses
/// these keys and the unique constraint absorbs the duplicates.
pub fn job_idempotency_key(job_type: JobType, submission_id: &str) -> String {
    match job_type {
        JobType::CtmConversion => format!("ctm_{}", submission_id),
        JobType::EmailNotification => format!("email_{}", submission_id),
    }
}

/// Durable side-effect queue for form submissions. Enqueue is idempotent,
/// processing claims small batches, and failures retry with exponential
/// backoff until the attempt cap.
pub struct JobQueue {
    forms: Arc<FormJobRepository>,
    crm: Option<Arc<dyn CrmClient>>,
    email: Option<Arc<dyn EmailSender>>,
    config: Config,
}

impl JobQueue {
    pub fn new(
        forms: Arc<FormJobRepository>,
        crm: Option<Arc<dyn CrmClient>>,
        email: Option<Arc<dyn EmailSender>>,
        config: Config,
    ) -> Self {
        Self { forms, crm, email, config }
    }

    /// Fans a stored submission out into its side-effect jobs, per the
    /// form's settings. Returns the ids of jobs actually inserted.
    pub fn enqueue_jobs_for_submission(
        &self,
        submission: &FormSubmission,
        settings: &FormSettings,
    ) -> Result<Vec<String>, DieselError> {
        let now = Utc::now().timestamp();
        let mut inserted = Vec::new();

        if settings.ctm_enabled {
            if let Some(id) = self.forms.enqueue(self.new_job(JobType::CtmConversion, &submission.id, now))? {
                inserted.push(id);
            }
        }
        if settings.email_enabled() {
            if let Some(id) = self.forms.enqueue(self.new_job(JobType::EmailNotification, &submission.id, now))? {
                inserted.push(id);
            }
        }
        info!(
            "Enqueued {} job(s) for submission {}",
            inserted.len(),
            submission.id
        );
        Ok(inserted)
    }

    fn new_job(&self, job_type: JobType, submission_id: &str, now: i64) -> NewFormSubmissionJob {
        NewFormSubmissionJob {
            id: Uuid::new_v4().to_string(),
            submission_id: submission_id.to_string(),
            job_type: job_type.as_str().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            attempts: 0,
            max_attempts: self.config.max_job_attempts,
            idempotency_key: job_idempotency_key(job_type, submission_id),
            scheduled_at: now,
            created_at: now,
        }
    }

    pub async fn process_batch(&self) -> Result<usize, DieselError> {
        self.process_batch_at(Utc::now().timestamp()).await
    }

    pub async fn process_batch_at(&self, now: i64) -> Result<usize, DieselError> {
        let claimed = self.forms.claim_batch(CLAIM_BATCH_SIZE, now)?;
        let count = claimed.len();
        for job in claimed {
            match self.run_job(&job).await {
                Ok(()) => {
                    self.forms.mark_completed(&job, now)?;
                    info!("Job {} ({}) completed", job.id, job.job_type);
                }
                Err(e) => {
                    let delay_ms = backoff_delay_ms(self.config.retry_base_delay_ms, job.attempts);
                    let next_attempt_at = now + delay_ms / 1000;
                    self.forms.mark_failed(&job, &e, next_attempt_at)?;
                    if job.attempts + 1 >= job.max_attempts {
                        error!(
                            "Job {} ({}) failed terminally after {} attempts: {}",
                            job.id,
                            job.job_type,
                            job.attempts + 1,
                            e
                        );
                    } else {
                        warn!(
                            "Job {} ({}) failed (attempt {}), retrying in {}ms: {}",
                            job.id,
                            job.job_type,
                            job.attempts + 1,
                            delay_ms,
                            e
                        );
                    }
                }
            }
        }
        Ok(count)
    }

    async fn run_job(&self, job: &FormSubmissionJob) -> Result<(), String> {
        let submission = self
            .forms
            .get_submission(&job.submission_id)
            .map_err(|e| format!("submission lookup failed: {}", e))?
            .ok_or_else(|| format!("submission {} not found", job.submission_id))?;
        let form = self
            .forms
            .get_form(&submission.form_id)
            .map_err(|e| format!("form lookup failed: {}", e))?
            .ok_or_else(|| format!("form {} not found", submission.form_id))?;
        let settings = FormSettings::parse(&form.settings);

        match job.job_type() {
            Some(JobType::CtmConversion) => self.run_crm_job(&submission, &settings).await,
            Some(JobType::EmailNotification) => self.run_email_job(&form, &submission, &settings).await,
            None => Err(format!("unknown job type {}", job.job_type)),
        }
    }

    async fn run_crm_job(
        &self,
        submission: &FormSubmission,
        settings: &FormSettings,
    ) -> Result<(), String> {
        let Some(crm) = &self.crm else {
            // Missing CRM configuration is a deliberate no-op, not a failure
            info!(
                "CRM not configured; skipping conversion push for submission {}",
                submission.id
            );
            return Ok(());
        };
        let payload = build_crm_payload(submission, settings);
        crm.send_conversion(&payload)
            .await
            .map_err(|e| format!("crm push failed: {}", e))
    }

    async fn run_email_job(
        &self,
        form: &crate::models::form_models::Form,
        submission: &FormSubmission,
        settings: &FormSettings,
    ) -> Result<(), String> {
        let sender = self
            .email
            .as_ref()
            .ok_or_else(|| "email transport not configured".to_string())?;
        let (subject, body) = build_notification_email(form, submission);
        // One failed recipient fails the job; completed jobs are never
        // partially sent
        for recipient in &settings.notification_emails {
            let email = OutboundEmail {
                to: recipient.clone(),
                subject: subject.clone(),
                text: body.clone(),
            };
            sender
                .send(&email)
                .await
                .map_err(|e| format!("send to {} failed: {}", recipient, e))?;
        }
        Ok(())
    }

    /// Shutdown hook: claimed-but-unfinished jobs return to pending.
    pub fn shutdown(&self) -> Result<usize, DieselError> {
        let released = self.forms.release_processing()?;
        if released > 0 {
            info!("Released {} in-flight job(s) back to pending", released);
        }
        Ok(released)
    }

    /// Retention sweep: redact PHI ciphertext from intake submissions older
    /// than the configured window.
    pub fn redact_old_submissions(&self) -> Result<usize, DieselError> {
        let cutoff = Utc::now().timestamp() - self.config.submission_retention_days * 86_400;
        let redacted = self.forms.redact_encrypted_payloads_before(cutoff)?;
        if redacted > 0 {
            info!("Redacted encrypted payloads from {} old submission(s)", redacted);
        }
        Ok(redacted)
    }
}
