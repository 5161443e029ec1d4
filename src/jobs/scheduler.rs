use tokio_cron_scheduler::{Job, JobScheduler};
use std::sync::Arc;
use chrono::Utc;
use tracing::{error, info};
use crate::AppState;

pub async fn start_scheduler(state: Arc<AppState>) {
    let sched = JobScheduler::new().await.expect("Failed to create scheduler");

    // Per-client call sync on the configured cadence
    let state_clone = Arc::clone(&state);
    let sync_job = Job::new_async(state.config.sync_cron.as_str(), move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            info!("Running scheduled call sync...");
            let profiles = match state.user_repository.get_profiles_with_credentials() {
                Ok(profiles) => profiles,
                Err(e) => {
                    error!("Failed to fetch client profiles for sync: {}", e);
                    return;
                }
            };
            for profile in profiles {
                let report = state.call_sync.sync_client(&profile.user_id, false).await;
                if !report.errors.is_empty() {
                    error!(
                        "Sync for user {} finished with {} error(s)",
                        profile.user_id,
                        report.errors.len()
                    );
                }
            }
        })
    })
    .expect("Failed to create sync job");
    sched.add(sync_job).await.expect("Failed to add sync job");

    // Form submission job queue, every 30 seconds
    let state_clone = Arc::clone(&state);
    let queue_job = Job::new_async("*/30 * * * * *", move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            match state.job_queue.process_batch().await {
                Ok(0) => {}
                Ok(n) => info!("Processed {} form submission job(s)", n),
                Err(e) => error!("Form job batch failed: {}", e),
            }
        })
    })
    .expect("Failed to create queue job");
    sched.add(queue_job).await.expect("Failed to add queue job");

    // Due-date automations, top of every hour
    let state_clone = Arc::clone(&state);
    let due_date_job = Job::new_async("0 0 * * * *", move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            info!("Running due-date automation pass...");
            if let Err(e) = state
                .automation_engine
                .run_due_date_automations(Utc::now().timestamp())
                .await
            {
                error!("Due-date automation pass failed: {}", e);
            }
        })
    })
    .expect("Failed to create due-date job");
    sched.add(due_date_job).await.expect("Failed to add due-date job");

    // Archived task purge, daily at 02:20
    let state_clone = Arc::clone(&state);
    let purge_job = Job::new_async("0 20 2 * * *", move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            if let Err(e) = state
                .automation_engine
                .purge_archived(state.config.archive_retention_days)
            {
                error!("Archived task purge failed: {}", e);
            }
        })
    })
    .expect("Failed to create purge job");
    sched.add(purge_job).await.expect("Failed to add purge job");

    // Submission PHI retention sweep, daily at 02:00
    let state_clone = Arc::clone(&state);
    let redaction_job = Job::new_async("0 0 2 * * *", move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            if let Err(e) = state.job_queue.redact_old_submissions() {
                error!("Submission redaction sweep failed: {}", e);
            }
        })
    })
    .expect("Failed to create redaction job");
    sched.add(redaction_job).await.expect("Failed to add redaction job");

    // Rate limiter bookkeeping, every 15 minutes
    let state_clone = Arc::clone(&state);
    let limiter_job = Job::new_async("0 */15 * * * *", move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            state.sync_limiter.evict_stale(Utc::now().timestamp());
        })
    })
    .expect("Failed to create limiter job");
    sched.add(limiter_job).await.expect("Failed to add limiter job");

    sched.start().await.expect("Failed to start scheduler");
    info!("Scheduler started");
}
