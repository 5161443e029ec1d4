use diesel::prelude::*;
use diesel::result::Error as DieselError;
use crate::{
    models::form_models::{
        Form, FormSubmission, NewFormSubmission, FormSubmissionJob, NewFormSubmissionJob,
        JobStatus, JobType,
    },
    schema::{forms, form_submissions, form_submission_jobs},
    DbPool,
};

pub struct FormJobRepository {
    pool: DbPool,
}

impl FormJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn insert_form(&self, form: Form) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(forms::table)
            .values(&form)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_form(&self, form_id: &str) -> Result<Option<Form>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let form = forms::table
            .find(form_id)
            .first::<Form>(&mut conn)
            .optional()?;
        Ok(form)
    }

    pub fn insert_submission(&self, submission: NewFormSubmission) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(form_submissions::table)
            .values(&submission)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_submission(&self, submission_id: &str) -> Result<Option<FormSubmission>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let submission = form_submissions::table
            .find(submission_id)
            .first::<FormSubmission>(&mut conn)
            .optional()?;
        Ok(submission)
    }

    /// Insert a job unless its idempotency key already exists. Returns the
    /// new job id, or None when the unique constraint absorbed a duplicate.
    pub fn enqueue(&self, job: NewFormSubmissionJob) -> Result<Option<String>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let job_id = job.id.clone();
        let inserted = diesel::insert_into(form_submission_jobs::table)
            .values(&job)
            .on_conflict(form_submission_jobs::idempotency_key)
            .do_nothing()
            .execute(&mut conn)?;
        Ok(if inserted > 0 { Some(job_id) } else { None })
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<FormSubmissionJob>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let job = form_submission_jobs::table
            .find(job_id)
            .first::<FormSubmissionJob>(&mut conn)
            .optional()?;
        Ok(job)
    }

    pub fn jobs_for_submission(&self, submission_id: &str) -> Result<Vec<FormSubmissionJob>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let jobs = form_submission_jobs::table
            .filter(form_submission_jobs::submission_id.eq(submission_id))
            .order(form_submission_jobs::created_at.asc())
            .load::<FormSubmissionJob>(&mut conn)?;
        Ok(jobs)
    }

    /// Claim up to `limit` due jobs and move them to `processing` in one
    /// transaction. Each candidate is taken with a compare-and-swap update
    /// on its prior status, so a row another worker claimed first reports
    /// zero affected rows and is skipped (the SQLite stand-in for
    /// `SELECT ... FOR UPDATE SKIP LOCKED`).
    pub fn claim_batch(&self, limit: i64, now: i64) -> Result<Vec<FormSubmissionJob>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        conn.transaction(|conn| {
            let candidates = form_submission_jobs::table
                .filter(form_submission_jobs::status.eq_any(vec!["pending", "failed"]))
                .filter(form_submission_jobs::attempts.lt(form_submission_jobs::max_attempts))
                .filter(form_submission_jobs::scheduled_at.le(now))
                .order(form_submission_jobs::scheduled_at.asc())
                .limit(limit)
                .load::<FormSubmissionJob>(conn)?;

            let mut claimed = Vec::with_capacity(candidates.len());
            for job in candidates {
                let taken = diesel::update(
                    form_submission_jobs::table
                        .find(&job.id)
                        .filter(form_submission_jobs::status.eq(&job.status)),
                )
                .set((
                    form_submission_jobs::status.eq(JobStatus::Processing.as_str()),
                    form_submission_jobs::started_at.eq(now),
                ))
                .execute(conn)?;
                if taken == 1 {
                    claimed.push(FormSubmissionJob {
                        status: JobStatus::Processing.as_str().to_string(),
                        started_at: Some(now),
                        ..job
                    });
                }
            }
            Ok(claimed)
        })
    }

    /// Terminal success: completes the job and stamps the parent submission
    /// flag in the same transaction.
    pub fn mark_completed(&self, job: &FormSubmissionJob, now: i64) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        conn.transaction(|conn| {
            diesel::update(form_submission_jobs::table.find(&job.id))
                .set((
                    form_submission_jobs::status.eq(JobStatus::Completed.as_str()),
                    form_submission_jobs::completed_at.eq(now),
                ))
                .execute(conn)?;

            match job.job_type() {
                Some(JobType::CtmConversion) => {
                    diesel::update(form_submissions::table.find(&job.submission_id))
                        .set((
                            form_submissions::ctm_sent.eq(true),
                            form_submissions::ctm_sent_at.eq(now),
                        ))
                        .execute(conn)?;
                }
                Some(JobType::EmailNotification) => {
                    diesel::update(form_submissions::table.find(&job.submission_id))
                        .set((
                            form_submissions::email_sent.eq(true),
                            form_submissions::email_sent_at.eq(now),
                        ))
                        .execute(conn)?;
                }
                None => {}
            }
            Ok(())
        })
    }

    pub fn mark_failed(&self, job: &FormSubmissionJob, error: &str, next_attempt_at: i64) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(form_submission_jobs::table.find(&job.id))
            .set((
                form_submission_jobs::status.eq(JobStatus::Failed.as_str()),
                form_submission_jobs::attempts.eq(job.attempts + 1),
                form_submission_jobs::last_error.eq(error),
                form_submission_jobs::scheduled_at.eq(next_attempt_at),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    // Shutdown path: anything still claimed goes back to pending so the
    // next worker picks it up.
    pub fn release_processing(&self) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let released = diesel::update(
            form_submission_jobs::table.filter(form_submission_jobs::status.eq("processing")),
        )
        .set((
            form_submission_jobs::status.eq(JobStatus::Pending.as_str()),
            form_submission_jobs::started_at.eq(None::<i64>),
        ))
        .execute(&mut conn)?;
        Ok(released)
    }

    // Legacy data redaction: drop PHI ciphertext from old intake submissions
    pub fn redact_encrypted_payloads_before(&self, cutoff: i64) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let redacted = diesel::update(
            form_submissions::table
                .filter(form_submissions::created_at.lt(cutoff))
                .filter(form_submissions::encrypted_payload.is_not_null()),
        )
        .set(form_submissions::encrypted_payload.eq(None::<Vec<u8>>))
        .execute(&mut conn)?;
        Ok(redacted)
    }
}
