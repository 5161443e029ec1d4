use dotenvy::dotenv;
use diesel::r2d2::{self, ConnectionManager};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api {
    pub mod ai;
    pub mod call_provider;
    pub mod crm;
    pub mod email;
}
mod models {
    pub mod call_models;
    pub mod form_models;
    pub mod task_models;
    pub mod user_models;
}
mod repositories {
    pub mod active_client_repository;
    pub mod call_log_repository;
    pub mod form_job_repository;
    pub mod notification_repository;
    pub mod task_repository;
    pub mod user_repository;
}
mod calls {
    pub mod classify;
    pub mod enrich;
    pub mod sync;
}
mod jobs {
    pub mod handlers;
    pub mod queue;
    pub mod scheduler;
}
mod automations {
    pub mod engine;
}
mod utils {
    pub mod config;
    pub mod detach;
    pub mod notify;
    pub mod ratelimit;
    #[cfg(test)]
    pub mod test_support;
}
mod schema;

use api::ai::OpenRouterClient;
use api::call_provider::CallTrackingClient;
use api::crm::HttpCrmClient;
use api::email::SmtpSender;
use automations::engine::AutomationEngine;
use calls::sync::CallSyncService;
use jobs::queue::JobQueue;
use repositories::active_client_repository::ActiveClientRepository;
use repositories::call_log_repository::CallLogRepository;
use repositories::form_job_repository::FormJobRepository;
use repositories::notification_repository::NotificationRepository;
use repositories::task_repository::TaskRepository;
use repositories::user_repository::UserRepository;
use utils::config::Config;
use utils::detach::DetachedPool;
use utils::notify::NotificationSink;
use utils::ratelimit::SyncRateLimiter;

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

// Manual reset-and-reload triggers per user per hour
const RESET_RATE_LIMIT: u32 = 3;
const RESET_RATE_WINDOW_SECS: i64 = 3600;

pub struct AppState {
    pub db_pool: DbPool,
    pub config: Config,
    pub user_repository: Arc<UserRepository>,
    pub call_log_repository: Arc<CallLogRepository>,
    pub active_client_repository: Arc<ActiveClientRepository>,
    pub form_job_repository: Arc<FormJobRepository>,
    pub task_repository: Arc<TaskRepository>,
    pub notification_repository: Arc<NotificationRepository>,
    pub notification_sink: Arc<NotificationSink>,
    pub sync_limiter: Arc<SyncRateLimiter>,
    pub call_sync: Arc<CallSyncService>,
    pub job_queue: Arc<JobQueue>,
    pub automation_engine: Arc<AutomationEngine>,
}

pub fn validate_env() {
    let _ = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");
    let _ = std::env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY must be set");
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    validate_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .build(manager)
        .expect("Failed to create pool");

    {
        let mut conn = pool.get().expect("Failed to get DB connection");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("Failed to run migrations");
    }

    let user_repository = Arc::new(UserRepository::new(pool.clone()));
    let call_log_repository = Arc::new(CallLogRepository::new(pool.clone()));
    let active_client_repository = Arc::new(ActiveClientRepository::new(pool.clone()));
    let form_job_repository = Arc::new(FormJobRepository::new(pool.clone()));
    let task_repository = Arc::new(TaskRepository::new(pool.clone()));
    let notification_repository = Arc::new(NotificationRepository::new(pool.clone()));

    let email_sender = match SmtpSender::from_env() {
        Ok(sender) => Some(Arc::new(sender) as Arc<dyn api::email::EmailSender>),
        Err(e) => {
            warn!("Email transport disabled: {}", e);
            None
        }
    };
    let crm_client = HttpCrmClient::from_env()
        .map(|client| Arc::new(client) as Arc<dyn api::crm::CrmClient>);
    if crm_client.is_none() {
        info!("CRM conversion endpoint not configured; conversion pushes are logged no-ops");
    }

    let notification_sink = Arc::new(NotificationSink::new(
        Arc::clone(&notification_repository),
        Arc::clone(&user_repository),
        email_sender.clone(),
    ));
    let sync_limiter = Arc::new(SyncRateLimiter::new(RESET_RATE_LIMIT, RESET_RATE_WINDOW_SECS));
    let detach_pool = Arc::new(DetachedPool::new(16));

    let call_sync = Arc::new(CallSyncService::new(
        Arc::clone(&user_repository),
        Arc::clone(&call_log_repository),
        Arc::clone(&active_client_repository),
        Arc::clone(&notification_sink),
        Arc::clone(&detach_pool),
        Arc::new(CallTrackingClient::from_env()),
        Arc::new(OpenRouterClient::from_env()),
        Arc::clone(&sync_limiter),
        config.clone(),
    ));
    let job_queue = Arc::new(JobQueue::new(
        Arc::clone(&form_job_repository),
        crm_client,
        email_sender,
        config.clone(),
    ));
    let automation_engine = Arc::new(AutomationEngine::new(
        Arc::clone(&task_repository),
        Arc::clone(&user_repository),
        Arc::clone(&notification_sink),
        Arc::clone(&detach_pool),
        config.timezone,
    ));

    let state = Arc::new(AppState {
        db_pool: pool,
        config,
        user_repository,
        call_log_repository,
        active_client_repository,
        form_job_repository,
        task_repository,
        notification_repository,
        notification_sink,
        sync_limiter,
        call_sync,
        job_queue: Arc::clone(&job_queue),
        automation_engine,
    });

    let state_for_scheduler = state.clone();
    tokio::spawn(async move {
        jobs::scheduler::start_scheduler(state_for_scheduler).await;
    });

    info!("opshub running; press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    // Put claimed-but-unfinished jobs back before exiting
    match job_queue.shutdown() {
        Ok(released) => info!("Shutdown complete ({} job(s) released)", released),
        Err(e) => error!("Failed to release in-flight jobs on shutdown: {}", e),
    }
}
