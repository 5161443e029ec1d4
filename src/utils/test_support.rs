use diesel::r2d2::{self, ConnectionManager};
use diesel::SqliteConnection;
use diesel_migrations::MigrationHarness;
use uuid::Uuid;
use crate::models::user_models::{NewUser, NewClientProfile};
use crate::DbPool;

/// Fresh in-memory database with the full schema applied. max_size(1)
/// because every SQLite `:memory:` connection is its own database.
pub fn test_pool() -> DbPool {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create test pool");
    {
        let mut conn = pool.get().expect("Failed to get test DB connection");
        conn.run_pending_migrations(crate::MIGRATIONS)
            .expect("Failed to run migrations");
    }
    pool
}

pub fn new_user(role: &str) -> NewUser {
    let id = Uuid::new_v4().to_string();
    NewUser {
        email: format!("{}@example.com", &id[..8]),
        id,
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        role: role.to_string(),
        avatar_url: None,
        email_notifications: true,
        created_at: chrono::Utc::now().timestamp(),
    }
}

pub fn new_profile(user_id: &str, auto_star: bool) -> NewClientProfile {
    NewClientProfile {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        ctm_account_id: Some("acct_1".to_string()),
        ctm_api_key: Some("key".to_string()),
        ctm_api_secret: Some("secret".to_string()),
        classify_prompt: Some("You classify calls for a dental clinic.".to_string()),
        auto_star_enabled: auto_star,
        account_manager_id: None,
        last_synced_at: None,
        created_at: chrono::Utc::now().timestamp(),
    }
}
