use std::env;
use std::str::FromStr;
use chrono_tz::Tz;

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

/// Operator configuration, read once at startup. Every knob has a default
/// so a bare environment still runs.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_calls: usize,                // CTM_MAX_CALLS: hard cap per sync pass
    pub classify_limit: usize,           // CTM_CLASSIFY_LIMIT: AI calls per sync pass
    pub full_sync_days: i64,             // CTM_FULL_SYNC_DAYS: lookback window for full syncs
    pub per_page: u32,                   // CTM_PER_PAGE: provider page size
    pub retry_base_delay_ms: i64,        // RETRY_BASE_DELAY_MS: job backoff base
    pub max_job_attempts: i32,           // MAX_JOB_ATTEMPTS
    pub archive_retention_days: i64,     // TASK_ARCHIVE_RETENTION_DAYS
    pub submission_retention_days: i64,  // SUBMISSION_RETENTION_DAYS: PHI redaction cutoff
    pub timezone: Tz,                    // AUTOMATION_TIMEZONE: due-date evaluation zone
    pub sync_cron: String,               // SYNC_CRON: per-client sync cadence
}

impl Config {
    pub fn from_env() -> Self {
        let timezone = env::var("AUTOMATION_TIMEZONE")
            .ok()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(chrono_tz::UTC);

        Config {
            max_calls: env_parse("CTM_MAX_CALLS", 200),
            classify_limit: env_parse("CTM_CLASSIFY_LIMIT", 40),
            full_sync_days: env_parse("CTM_FULL_SYNC_DAYS", 365),
            per_page: env_parse("CTM_PER_PAGE", 100),
            retry_base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", 5000),
            max_job_attempts: env_parse("MAX_JOB_ATTEMPTS", 5),
            archive_retention_days: env_parse("TASK_ARCHIVE_RETENTION_DAYS", 30),
            submission_retention_days: env_parse("SUBMISSION_RETENTION_DAYS", 180),
            timezone,
            sync_cron: env::var("SYNC_CRON").unwrap_or_else(|_| "0 */10 * * * *".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_calls: 200,
            classify_limit: 40,
            full_sync_days: 365,
            per_page: 100,
            retry_base_delay_ms: 5000,
            max_job_attempts: 5,
            archive_retention_days: 30,
            submission_retention_days: 180,
            timezone: chrono_tz::UTC,
            sync_cron: "0 */10 * * * *".to_string(),
        }
    }
}
