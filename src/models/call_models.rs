use diesel::prelude::*;
use serde_json::{json, Value};
use crate::schema::{call_logs, active_clients};

/// Closed category set every call log ends up in. Free strings coming back
/// from the AI collaborator are folded into this set in `calls::classify`;
/// inside the engine only the enum is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Converted,
    Warm,
    VeryGood,
    NeedsAttention,
    Applicant,
    Voicemail,
    Unanswered,
    NotAFit,
    Spam,
    Neutral,
    Unreviewed,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Converted => "converted",
            Category::Warm => "warm",
            Category::VeryGood => "very_good",
            Category::NeedsAttention => "needs_attention",
            Category::Applicant => "applicant",
            Category::Voicemail => "voicemail",
            Category::Unanswered => "unanswered",
            Category::NotAFit => "not_a_fit",
            Category::Spam => "spam",
            Category::Neutral => "neutral",
            Category::Unreviewed => "unreviewed",
        }
    }

    /// Strict parse of a persisted category column. Anything outside the
    /// closed set reads back as `Unreviewed`.
    pub fn parse(s: &str) -> Category {
        match s {
            "converted" => Category::Converted,
            "warm" => Category::Warm,
            "very_good" => Category::VeryGood,
            "needs_attention" => Category::NeedsAttention,
            "applicant" => Category::Applicant,
            "voicemail" => Category::Voicemail,
            "unanswered" => Category::Unanswered,
            "not_a_fit" => Category::NotAFit,
            "spam" => Category::Spam,
            "neutral" => Category::Neutral,
            _ => Category::Unreviewed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerType {
    New,
    Repeat,
    ReturningCustomer,
}

impl CallerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerType::New => "new",
            CallerType::Repeat => "repeat",
            CallerType::ReturningCustomer => "returning_customer",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = call_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CallLog {
    pub id: String,
    pub user_id: String,
    pub call_id: String, // provider call id, unique per user
    pub direction: String,
    pub from_number: String, // normalized caller number
    pub to_number: String,
    pub started_at: Option<i64>,
    pub duration_sec: Option<i32>,
    pub score: i32, // 0 = unrated, 1..5 stars
    pub meta: String, // json bag: provider fields, classification, flags
    pub created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = call_logs)]
pub struct NewCallLog {
    pub id: String,
    pub user_id: String,
    pub call_id: String,
    pub direction: String,
    pub from_number: String,
    pub to_number: String,
    pub started_at: Option<i64>,
    pub duration_sec: Option<i32>,
    pub score: i32,
    pub meta: String,
    pub created_at: i64,
}

/// Typed accessors over the schemaless `call_logs.meta` bag. The bag mirrors
/// external payloads of varying shape, so fields are validated at the point
/// of use instead of being modeled as a strict record.
#[derive(Debug, Clone)]
pub struct CallMeta(pub Value);

impl CallMeta {
    pub fn new() -> Self {
        CallMeta(json!({}))
    }

    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(v) if v.is_object() => CallMeta(v),
            _ => CallMeta::new(),
        }
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    fn set(&mut self, key: &str, value: Value) {
        if let Some(map) = self.0.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    pub fn category(&self) -> Category {
        self.get_str("category").map(Category::parse).unwrap_or(Category::Unreviewed)
    }

    pub fn set_category(&mut self, category: Category) {
        self.set("category", json!(category.as_str()));
    }

    pub fn summary(&self) -> Option<&str> {
        self.get_str("summary")
    }

    pub fn set_summary(&mut self, summary: &str) {
        self.set("summary", json!(summary));
    }

    /// Whether a classification pass (AI or fallback) has already decided
    /// this record. Guards against re-sending it to the AI on later syncs.
    pub fn classified(&self) -> bool {
        self.0.get("classified").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_classified(&mut self, value: bool) {
        self.set("classified", json!(value));
    }

    /// Raw category string the AI produced, kept for audit only. The
    /// displayed category may differ once a provider rating takes over.
    pub fn ai_category(&self) -> Option<&str> {
        self.get_str("ai_category")
    }

    pub fn set_ai_category(&mut self, raw: &str) {
        self.set("ai_category", json!(raw));
    }

    pub fn caller_type(&self) -> Option<&str> {
        self.get_str("caller_type")
    }

    pub fn set_caller_type(&mut self, caller_type: CallerType) {
        self.set("caller_type", json!(caller_type.as_str()));
    }

    pub fn call_sequence(&self) -> Option<i64> {
        self.0.get("call_sequence").and_then(Value::as_i64)
    }

    pub fn set_call_sequence(&mut self, sequence: i64) {
        self.set("call_sequence", json!(sequence));
    }

    pub fn set_active_client_id(&mut self, id: &str) {
        self.set("active_client_id", json!(id));
    }

    pub fn caller_name(&self) -> Option<&str> {
        self.get_str("caller_name")
    }

    pub fn set_caller_name(&mut self, name: &str) {
        self.set("caller_name", json!(name));
    }

    pub fn is_voicemail(&self) -> bool {
        self.0.get("is_voicemail").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_is_voicemail(&mut self, value: bool) {
        self.set("is_voicemail", json!(value));
    }

    /// Denormalized copy of the raw provider record.
    pub fn set_provider(&mut self, record: Value) {
        self.set("provider", record);
    }

    pub fn to_json_string(&self) -> String {
        self.0.to_string()
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = active_clients)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ActiveClient {
    pub id: String,
    pub owner_user_id: String,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub client_email: Option<String>,
    pub source: Option<String>, // comma-joined attribution list
    pub funnel_data: Option<String>,
    pub archived_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = active_clients)]
pub struct NewActiveClient {
    pub id: String,
    pub owner_user_id: String,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub client_email: Option<String>,
    pub source: Option<String>,
    pub funnel_data: Option<String>,
    pub archived_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}
