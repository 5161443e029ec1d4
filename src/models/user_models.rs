use diesel::prelude::*;
use crate::schema::{users, client_profiles, notifications};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Superadmin,
    Admin,
    Team,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::Admin => "admin",
            Role::Team => "team",
            Role::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "superadmin" => Some(Role::Superadmin),
            "admin" => Some(Role::Admin),
            "team" => Some(Role::Team),
            "client" => Some(Role::Client),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Superadmin | Role::Admin)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub email_notifications: bool,
    pub created_at: i64, // epoch seconds utc
}

impl User {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub email_notifications: bool,
    pub created_at: i64,
}

// Per-client tenancy metadata: call provider credentials, classification
// prompt override and the incremental sync cursor.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = client_profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ClientProfile {
    pub id: String,
    pub user_id: String,
    pub ctm_account_id: Option<String>,
    pub ctm_api_key: Option<String>,
    pub ctm_api_secret: Option<String>,
    pub classify_prompt: Option<String>,
    pub auto_star_enabled: bool,
    pub account_manager_id: Option<String>,
    pub last_synced_at: Option<i64>, // max started_at of the last successful sync pass
    pub created_at: i64,
}

impl ClientProfile {
    pub fn has_provider_credentials(&self) -> bool {
        self.ctm_account_id.as_deref().map_or(false, |s| !s.is_empty())
            && self.ctm_api_key.as_deref().map_or(false, |s| !s.is_empty())
            && self.ctm_api_secret.as_deref().map_or(false, |s| !s.is_empty())
    }
}

#[derive(Insertable)]
#[diesel(table_name = client_profiles)]
pub struct NewClientProfile {
    pub id: String,
    pub user_id: String,
    pub ctm_account_id: Option<String>,
    pub ctm_api_key: Option<String>,
    pub ctm_api_secret: Option<String>,
    pub classify_prompt: Option<String>,
    pub auto_star_enabled: bool,
    pub account_manager_id: Option<String>,
    pub last_synced_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub link_url: Option<String>,
    pub meta: String, // json bag
    pub read_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub link_url: Option<String>,
    pub meta: String,
    pub created_at: i64,
}
