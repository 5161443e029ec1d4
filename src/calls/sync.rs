use std::sync::Arc;
use chrono::{Duration, TimeZone, Utc};
use diesel::result::Error as DieselError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::ai::{AiClient, GenerateRequest};
use crate::api::call_provider::{CallProvider, CallsQuery, ProviderCredentials, SalePayload};
use crate::calls::classify::{
    auto_star_score, build_system_prompt, classifiable_text, elevate_for_voicemail,
    fallback_category, parse_ai_response, rating_to_category, DEFAULT_BUSINESS_PROMPT,
};
use crate::calls::enrich::{caller_identity, match_active_client, normalize_phone};
use crate::models::call_models::{CallMeta, Category, NewCallLog};
use crate::models::user_models::ClientProfile;
use crate::repositories::active_client_repository::ActiveClientRepository;
use crate::repositories::call_log_repository::CallLogRepository;
use crate::repositories::user_repository::UserRepository;
use crate::utils::config::Config;
use crate::utils::detach::DetachedPool;
use crate::utils::notify::{NotificationRequest, NotificationSink};
use crate::utils::ratelimit::SyncRateLimiter;

const CACHED_DATA_WARNING: &str = "Unable to fetch latest calls. Showing cached data.";

// Provider field names have drifted across API versions; each logical field
// is read through a fallback chain.
const ID_FIELDS: &[&str] = &["id", "call_id", "sid", "uuid", "callSid", "call_uuid", "callId"];
const FROM_FIELDS: &[&str] = &["caller_number", "from_number", "from"];
const TO_FIELDS: &[&str] = &["tracking_number", "to_number", "to", "called_number"];
const STARTED_FIELDS: &[&str] = &["called_at", "start_time", "started_at", "timestamp"];
const DURATION_FIELDS: &[&str] = &["talk_time", "duration", "duration_sec", "duration_seconds"];
const SCORE_FIELDS: &[&str] = &["score", "rating"];
const STATUS_FIELDS: &[&str] = &["status", "call_status", "disposition"];
const TRANSCRIPT_FIELDS: &[&str] = &["transcription", "transcript"];
const MESSAGE_FIELDS: &[&str] = &["notes", "message", "body"];
const NAME_FIELDS: &[&str] = &["caller_name", "name", "caller"];

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_str(record: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| record.get(*name).and_then(value_to_string))
}

fn field_i64(record: &Value, names: &[&str]) -> Option<i64> {
    names.iter().find_map(|name| {
        record.get(*name).and_then(|v| {
            v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
        })
    })
}

/// Provider call id, tried through the historical field-name chain.
/// Records without any id are dropped.
pub fn record_call_id(record: &Value) -> Option<String> {
    field_str(record, ID_FIELDS)
}

fn record_started_at(record: &Value) -> Option<i64> {
    for name in STARTED_FIELDS {
        match record.get(*name) {
            Some(Value::Number(n)) => return n.as_i64(),
            Some(Value::String(s)) => {
                let s = s.trim();
                if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                    return Some(dt.timestamp());
                }
                if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(s) {
                    return Some(dt.timestamp());
                }
                if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                    return Some(Utc.from_utc_datetime(&naive).timestamp());
                }
                if let Ok(epoch) = s.parse::<i64>() {
                    return Some(epoch);
                }
            }
            _ => {}
        }
    }
    None
}

fn record_score(record: &Value) -> i32 {
    field_i64(record, SCORE_FIELDS).unwrap_or(0).clamp(0, 5) as i32
}

fn status_values(record: &Value) -> Vec<String> {
    STATUS_FIELDS
        .iter()
        .filter_map(|name| record.get(*name).and_then(value_to_string))
        .map(|s| s.to_lowercase())
        .collect()
}

fn record_is_voicemail(record: &Value) -> bool {
    status_values(record).iter().any(|s| s.contains("voicemail"))
}

fn record_is_missed(record: &Value) -> bool {
    status_values(record).iter().any(|s| {
        s.contains("missed") || s.contains("busy") || s.contains("no-answer") || s.contains("no_answer") || s == "no answer"
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub latest_timestamp: Option<i64>,
    pub pages_processed: u32,
    pub start_date: String,
    pub end_date: String,
    pub total_fetched: usize,
    pub processed_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RatingError {
    #[error("score must be between 1 and 5")]
    InvalidScore,
    #[error("call not found")]
    NotFound,
    #[error("too many sync requests; try again later")]
    RateLimited,
    #[error("database error: {0}")]
    Db(#[from] DieselError),
}

/// One sync pass per client: fetch pages from the call provider since the
/// cursor, reconcile ratings, classify new text, enrich caller identity
/// and persist. Transient failures surface in the report, never as errors.
pub struct CallSyncService {
    users: Arc<UserRepository>,
    call_logs: Arc<CallLogRepository>,
    active_clients: Arc<ActiveClientRepository>,
    sink: Arc<NotificationSink>,
    detach: Arc<DetachedPool>,
    provider: Arc<dyn CallProvider>,
    ai: Arc<dyn AiClient>,
    limiter: Arc<SyncRateLimiter>,
    config: Config,
}

impl CallSyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<UserRepository>,
        call_logs: Arc<CallLogRepository>,
        active_clients: Arc<ActiveClientRepository>,
        sink: Arc<NotificationSink>,
        detach: Arc<DetachedPool>,
        provider: Arc<dyn CallProvider>,
        ai: Arc<dyn AiClient>,
        limiter: Arc<SyncRateLimiter>,
        config: Config,
    ) -> Self {
        Self { users, call_logs, active_clients, sink, detach, provider, ai, limiter, config }
    }

    pub async fn sync_client(&self, user_id: &str, full_sync: bool) -> SyncReport {
        let mut report = SyncReport::default();

        let profile = match self.users.get_profile(user_id) {
            Ok(Some(profile)) if profile.has_provider_credentials() => profile,
            Ok(_) => {
                info!("Skipping sync for user {}: no provider credentials", user_id);
                report.errors.push(CACHED_DATA_WARNING.to_string());
                return report;
            }
            Err(e) => {
                error!("Failed to load client profile for user {}: {}", user_id, e);
                report.errors.push(CACHED_DATA_WARNING.to_string());
                return report;
            }
        };
        let credentials = match profile_credentials(&profile) {
            Some(credentials) => credentials,
            None => {
                report.errors.push(CACHED_DATA_WARNING.to_string());
                return report;
            }
        };

        let today = Utc::now().date_naive();
        let full = full_sync || profile.last_synced_at.is_none();
        let start = if full {
            today - Duration::days(self.config.full_sync_days)
        } else {
            // One-day underlap absorbs clock skew and rating backfills
            let cursor = profile.last_synced_at.unwrap_or(0);
            Utc.timestamp_opt(cursor, 0)
                .single()
                .map(|dt| dt.date_naive())
                .unwrap_or(today) - Duration::days(1)
        };
        let end = today + Duration::days(1);
        report.start_date = start.format("%Y-%m-%d").to_string();
        report.end_date = end.format("%Y-%m-%d").to_string();

        let mut classify_remaining = self.config.classify_limit;
        let mut latest = profile.last_synced_at;
        let mut page = 1u32;

        'pages: loop {
            let query = CallsQuery {
                start_date: report.start_date.clone(),
                end_date: report.end_date.clone(),
                per_page: self.config.per_page,
                page,
            };
            let calls = match self.provider.fetch_calls_page(&credentials, &query).await {
                Ok(calls) => calls,
                Err(e) => {
                    // Abort the pass and keep the cursor; next tick retries
                    error!("Provider fetch failed for user {} page {}: {}", user_id, page, e);
                    report.errors.push(format!("provider fetch failed on page {}: {}", page, e));
                    return report;
                }
            };
            report.pages_processed += 1;
            let fetched = calls.len();
            report.total_fetched += fetched;

            for record in &calls {
                if report.processed_count >= self.config.max_calls {
                    break 'pages;
                }
                match self.process_record(&profile, &credentials, record, &mut classify_remaining).await {
                    Ok(started_at) => {
                        report.processed_count += 1;
                        if let Some(ts) = started_at {
                            latest = Some(latest.map_or(ts, |cur| cur.max(ts)));
                        }
                    }
                    Err(e) => {
                        // Skip the record, keep the pass going
                        error!("Failed to process call record for user {}: {}", user_id, e);
                        report.errors.push(e);
                    }
                }
            }

            if fetched < self.config.per_page as usize {
                break;
            }
            page += 1;
        }

        // Cursor moves only after every page has been processed
        if let Some(cursor) = latest {
            if let Err(e) = self.users.update_last_synced_at(user_id, cursor) {
                error!("Failed to persist sync cursor for user {}: {}", user_id, e);
                report.errors.push(format!("failed to persist cursor: {}", e));
            }
        }
        report.latest_timestamp = latest;
        info!(
            "Sync finished for user {}: {} fetched, {} processed, {} errors",
            user_id, report.total_fetched, report.processed_count, report.errors.len()
        );
        report
    }

    async fn process_record(
        &self,
        profile: &ClientProfile,
        credentials: &ProviderCredentials,
        record: &Value,
        classify_remaining: &mut usize,
    ) -> Result<Option<i64>, String> {
        let user_id = profile.user_id.as_str();
        let call_id = match record_call_id(record) {
            Some(id) => id,
            None => {
                warn!("Dropping call record without an id for user {}", user_id);
                return Ok(None);
            }
        };

        let existing = self
            .call_logs
            .find_by_provider_id(user_id, &call_id)
            .map_err(|e| format!("lookup failed for call {}: {}", call_id, e))?;
        let db_score = existing.as_ref().map_or(0, |log| log.score);
        let mut meta = existing
            .as_ref()
            .map(|log| CallMeta::parse(&log.meta))
            .unwrap_or_else(CallMeta::new);

        let provider_score = record_score(record);
        let started_at = record_started_at(record);
        let duration = field_i64(record, DURATION_FIELDS).map(|d| d as i32);
        let is_voicemail = record_is_voicemail(record);
        let is_missed = record_is_missed(record);
        let zero_duration = duration.map_or(false, |d| d == 0);

        meta.set_provider(record.clone());
        meta.set_is_voicemail(is_voicemail);
        if let Some(name) = field_str(record, NAME_FIELDS) {
            meta.set_caller_name(&name);
        }

        let mut final_score = db_score;
        let mut fresh_category: Option<Category> = None;
        let mut auto_star_push: Option<i32> = None;

        if provider_score > 0 {
            // Provider ratings are authoritative over both score and category
            final_score = provider_score;
            if let Some(category) = rating_to_category(provider_score) {
                meta.set_category(category);
            }
        } else if db_score > 0 {
            // Rating removed at the source
            final_score = 0;
            meta.set_category(Category::Unreviewed);
            meta.set_classified(false);
        } else if !meta.classified() {
            let transcript = field_str(record, TRANSCRIPT_FIELDS);
            let message = field_str(record, MESSAGE_FIELDS);
            match classifiable_text(transcript.as_deref(), message.as_deref()) {
                None => {
                    meta.set_category(fallback_category(is_voicemail, is_missed, zero_duration));
                    meta.set_classified(true);
                }
                Some(text) => {
                    if *classify_remaining == 0 {
                        // Over the per-pass cap; picked up on a later run
                        meta.set_category(Category::Unreviewed);
                    } else {
                        *classify_remaining -= 1;
                        let request = GenerateRequest {
                            prompt: text,
                            system_prompt: build_system_prompt(
                                profile.classify_prompt.as_deref().unwrap_or(DEFAULT_BUSINESS_PROMPT),
                            ),
                            temperature: 0.2,
                            max_tokens: 200,
                        };
                        match self.ai.generate(&request).await {
                            Err(e) => {
                                warn!("AI classification failed for call {}: {}", call_id, e);
                                meta.set_category(Category::Unreviewed);
                            }
                            Ok(response) => {
                                let parsed = parse_ai_response(&response);
                                if parsed.category == Category::Unreviewed && parsed.raw_category.is_empty() {
                                    meta.set_category(Category::Unreviewed);
                                } else {
                                    meta.set_ai_category(&parsed.raw_category);
                                    if let Some(summary) = &parsed.summary {
                                        meta.set_summary(summary);
                                    }
                                    let category = elevate_for_voicemail(parsed.category, is_voicemail, false);
                                    meta.set_category(category);
                                    meta.set_classified(true);
                                    fresh_category = Some(category);
                                    if profile.auto_star_enabled {
                                        let derived = auto_star_score(category);
                                        final_score = derived;
                                        auto_star_push = Some(derived);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        // Caller enrichment, refreshed on every sync
        let normalized = field_str(record, FROM_FIELDS)
            .as_deref()
            .and_then(normalize_phone);
        let from_number = normalized.clone().unwrap_or_default();
        if let Some(phone) = &normalized {
            let now = Utc::now().timestamp();
            let clients = self
                .active_clients
                .list_active_for_owner(user_id, now)
                .map_err(|e| format!("active client lookup failed: {}", e))?;
            let active_hit = match_active_client(&clients, phone);
            let prior = self
                .call_logs
                .count_prior_calls(user_id, phone, &call_id)
                .map_err(|e| format!("prior call count failed: {}", e))?;
            let (caller_type, sequence) = caller_identity(active_hit.is_some(), prior);
            meta.set_caller_type(caller_type);
            meta.set_call_sequence(sequence);
            if let Some(client) = active_hit {
                meta.set_active_client_id(&client.id);
                if meta.caller_name().is_none() {
                    if let Some(name) = &client.client_name {
                        meta.set_caller_name(name);
                    }
                }
            }
        } else {
            meta.set_caller_type(crate::models::call_models::CallerType::New);
            meta.set_call_sequence(1);
        }

        let row = NewCallLog {
            id: existing.as_ref().map(|log| log.id.clone()).unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: user_id.to_string(),
            call_id: call_id.clone(),
            direction: field_str(record, &["direction"]).unwrap_or_else(|| "inbound".to_string()),
            from_number,
            to_number: field_str(record, TO_FIELDS).unwrap_or_default(),
            started_at,
            duration_sec: duration,
            score: final_score,
            meta: meta.to_json_string(),
            created_at: Utc::now().timestamp(),
        };
        self.call_logs
            .upsert(row)
            .map_err(|e| format!("upsert failed for call {}: {}", call_id, e))?;

        if let Some(score) = auto_star_push {
            // Observed source behavior: conversion stays 1 even when the
            // derived score marks the call as spam
            let sale = SalePayload {
                score,
                conversion: 1,
                value: 0.0,
                sale_date: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            };
            if let Err(e) = self.provider.post_sale(credentials, &call_id, &sale).await {
                warn!("Auto-star push failed for call {}: {}", call_id, e);
            }
        }

        if fresh_category == Some(Category::NeedsAttention) && provider_score == 0 && db_score == 0 {
            self.emit_needs_attention(profile, &call_id, &meta);
        }

        Ok(started_at)
    }

    /// Fire-and-forget notification to the account manager (or the first
    /// admin) when a freshly classified call needs attention.
    fn emit_needs_attention(&self, profile: &ClientProfile, call_id: &str, meta: &CallMeta) {
        let recipient = match &profile.account_manager_id {
            Some(id) => Some(id.clone()),
            None => match self.users.get_admins() {
                Ok(admins) => admins.first().map(|admin| admin.id.clone()),
                Err(e) => {
                    error!("Failed to look up admins for needs-attention notification: {}", e);
                    None
                }
            },
        };
        let Some(recipient) = recipient else {
            warn!("No recipient for needs-attention notification on call {}", call_id);
            return;
        };

        let caller = meta.caller_name().unwrap_or("Unknown caller").to_string();
        let request = NotificationRequest {
            user_id: recipient,
            title: "Call needs attention".to_string(),
            body: format!("{} left a call that needs attention.", caller),
            link_url: Some(format!("/calls?client={}&call={}", profile.user_id, call_id)),
            meta: json!({"call_id": call_id, "category": Category::NeedsAttention.as_str()}),
        };
        let sink = Arc::clone(&self.sink);
        self.detach.spawn("needs_attention_notification", async move {
            sink.create(request).await.map_err(|e| e.to_string())
        });
    }

    /// Sets a local star rating and pushes it to the provider best-effort.
    /// A failed push comes back as a warning, not an error.
    pub async fn rate_call(&self, user_id: &str, call_id: &str, score: i32) -> Result<Option<String>, RatingError> {
        if !(1..=5).contains(&score) {
            return Err(RatingError::InvalidScore);
        }
        let log = self
            .call_logs
            .find_by_provider_id(user_id, call_id)?
            .ok_or(RatingError::NotFound)?;
        let mut meta = CallMeta::parse(&log.meta);
        if let Some(category) = rating_to_category(score) {
            meta.set_category(category);
        }
        self.call_logs
            .update_score_and_meta(user_id, call_id, score, &meta.to_json_string())?;
        Ok(self.push_score(user_id, call_id, score).await)
    }

    pub async fn clear_call_rating(&self, user_id: &str, call_id: &str) -> Result<Option<String>, RatingError> {
        let log = self
            .call_logs
            .find_by_provider_id(user_id, call_id)?
            .ok_or(RatingError::NotFound)?;
        let mut meta = CallMeta::parse(&log.meta);
        meta.set_category(Category::Unreviewed);
        meta.set_classified(false);
        self.call_logs
            .update_score_and_meta(user_id, call_id, 0, &meta.to_json_string())?;
        Ok(self.push_score(user_id, call_id, 0).await)
    }

    async fn push_score(&self, user_id: &str, call_id: &str, score: i32) -> Option<String> {
        let credentials = match self.users.get_profile(user_id) {
            Ok(Some(profile)) => profile_credentials(&profile),
            _ => None,
        };
        let Some(credentials) = credentials else {
            return Some("Rating saved locally; provider credentials are missing.".to_string());
        };
        let sale = SalePayload {
            score,
            conversion: if score > 0 { 1 } else { 0 },
            value: 0.0,
            sale_date: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
        };
        match self.provider.post_sale(&credentials, call_id, &sale).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Rating push failed for call {}: {}", call_id, e);
                Some("Rating saved locally, but syncing it to the provider failed.".to_string())
            }
        }
    }

    /// Wipes the client's call history and replays a full sync. Manual
    /// trigger, so it runs behind the per-user rate limiter.
    pub async fn reset_and_reload(&self, user_id: &str) -> Result<SyncReport, RatingError> {
        if !self.limiter.check(user_id, Utc::now().timestamp()) {
            return Err(RatingError::RateLimited);
        }
        let deleted = self.call_logs.delete_all_for_user(user_id)?;
        info!("Reset {} call logs for user {}", deleted, user_id);
        Ok(self.sync_client(user_id, true).await)
    }
}

fn profile_credentials(profile: &ClientProfile) -> Option<ProviderCredentials> {
    Some(ProviderCredentials {
        account_id: profile.ctm_account_id.clone()?,
        api_key: profile.ctm_api_key.clone()?,
        api_secret: profile.ctm_api_secret.clone()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use async_trait::async_trait;
    use crate::api::ai::AiError;
    use crate::api::call_provider::ProviderError;
    use crate::models::call_models::NewActiveClient;
    use crate::repositories::notification_repository::NotificationRepository;
    use crate::utils::test_support::{new_profile, new_user, test_pool};

    struct FakeProvider {
        calls: Mutex<Vec<Value>>,
        sales: Mutex<Vec<(String, SalePayload)>>,
        fail: AtomicBool,
    }

    impl FakeProvider {
        fn new(calls: Vec<Value>) -> Self {
            Self { calls: Mutex::new(calls), sales: Mutex::new(Vec::new()), fail: AtomicBool::new(false) }
        }

        fn sales(&self) -> Vec<(String, SalePayload)> {
            self.sales.lock().unwrap().clone()
        }

        fn set_calls(&self, calls: Vec<Value>) {
            *self.calls.lock().unwrap() = calls;
        }
    }

    #[async_trait]
    impl CallProvider for FakeProvider {
        async fn fetch_calls_page(
            &self,
            _credentials: &ProviderCredentials,
            query: &CallsQuery,
        ) -> Result<Vec<Value>, ProviderError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProviderError::Status(503));
            }
            if query.page == 1 {
                Ok(self.calls.lock().unwrap().clone())
            } else {
                Ok(Vec::new())
            }
        }

        async fn post_sale(
            &self,
            _credentials: &ProviderCredentials,
            call_id: &str,
            sale: &SalePayload,
        ) -> Result<(), ProviderError> {
            self.sales.lock().unwrap().push((call_id.to_string(), sale.clone()));
            Ok(())
        }
    }

    struct FakeAi {
        // keyed by a substring of the prompt text
        responses: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl FakeAi {
        fn new(responses: &[(&str, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AiClient for FakeAi {
        async fn generate(&self, request: &GenerateRequest) -> Result<String, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .iter()
                .find(|(key, _)| request.prompt.contains(key.as_str()))
                .map(|(_, response)| response.clone())
                .ok_or(AiError::Empty)
        }
    }

    struct Harness {
        service: CallSyncService,
        call_logs: Arc<CallLogRepository>,
        active_clients: Arc<ActiveClientRepository>,
        notifications: Arc<NotificationRepository>,
        provider: Arc<FakeProvider>,
        ai: Arc<FakeAi>,
        user_id: String,
        manager_id: String,
    }

    fn call_record(id: &str, transcript: &str, score: i64, status: &str) -> Value {
        json!({
            "id": id,
            "direction": "inbound",
            "caller_number": format!("+1555000{}", id.len()),
            "tracking_number": "+15559990000",
            "called_at": "2026-08-20T14:30:00Z",
            "talk_time": 95,
            "score": score,
            "status": status,
            "transcription": transcript,
            "caller_name": format!("Caller {}", id),
        })
    }

    fn harness(calls: Vec<Value>, ai_responses: &[(&str, &str)], auto_star: bool) -> Harness {
        harness_with_config(calls, ai_responses, auto_star, Config::default())
    }

    fn harness_with_config(
        calls: Vec<Value>,
        ai_responses: &[(&str, &str)],
        auto_star: bool,
        config: Config,
    ) -> Harness {
        let pool = test_pool();
        let users = Arc::new(UserRepository::new(pool.clone()));
        let call_logs = Arc::new(CallLogRepository::new(pool.clone()));
        let active_clients = Arc::new(ActiveClientRepository::new(pool.clone()));
        let notifications = Arc::new(NotificationRepository::new(pool.clone()));

        let manager = new_user("admin");
        let manager_id = manager.id.clone();
        users.create_user(manager).unwrap();
        let client = new_user("client");
        let user_id = client.id.clone();
        users.create_user(client).unwrap();
        let mut profile = new_profile(&user_id, auto_star);
        profile.account_manager_id = Some(manager_id.clone());
        users.create_profile(profile).unwrap();

        let sink = Arc::new(NotificationSink::new(Arc::clone(&notifications), Arc::clone(&users), None));
        let provider = Arc::new(FakeProvider::new(calls));
        let ai = Arc::new(FakeAi::new(ai_responses));
        let service = CallSyncService::new(
            Arc::clone(&users),
            Arc::clone(&call_logs),
            Arc::clone(&active_clients),
            sink,
            Arc::new(DetachedPool::new(4)),
            Arc::clone(&provider) as Arc<dyn CallProvider>,
            Arc::clone(&ai) as Arc<dyn AiClient>,
            Arc::new(SyncRateLimiter::new(3, 3600)),
            config,
        );

        Harness { service, call_logs, active_clients, notifications, provider, ai, user_id, manager_id }
    }

    fn warm_json(summary: &str) -> String {
        format!(r#"{{"category": "warm", "summary": "{}"}}"#, summary)
    }

    #[tokio::test]
    async fn first_sync_classifies_and_auto_stars() {
        let calls = vec![
            call_record("a", "I'd like a quote for my kitchen", 0, "answered"),
            call_record("b", "Congratulations you won a cruise", 0, "answered"),
            call_record("c", "Just checking your opening hours", 0, "answered"),
        ];
        let h = harness(
            calls,
            &[
                ("kitchen", &warm_json("Kitchen remodel lead.")),
                ("cruise", r#"{"category": "spam", "summary": "Robocall."}"#),
                ("hours", r#"{"category": "neutral", "summary": "Hours question."}"#),
            ],
            true,
        );

        let report = h.service.sync_client(&h.user_id, false).await;
        assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);
        assert_eq!(report.processed_count, 3);
        assert_eq!(h.ai.call_count(), 3);

        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        assert_eq!(logs.len(), 3);
        let by_call: HashMap<_, _> = logs.iter().map(|l| (l.call_id.clone(), l)).collect();
        assert_eq!(by_call["a"].score, 3);
        assert_eq!(by_call["b"].score, 1);
        assert_eq!(by_call["c"].score, 0);
        assert_eq!(CallMeta::parse(&by_call["a"].meta).category(), Category::Warm);
        assert_eq!(CallMeta::parse(&by_call["b"].meta).category(), Category::Spam);
        assert_eq!(CallMeta::parse(&by_call["c"].meta).category(), Category::Neutral);

        // Derived scores are pushed to the provider, zero included
        let sales = h.provider.sales();
        assert_eq!(sales.len(), 3);
        let pushed: HashMap<_, _> = sales.iter().map(|(id, sale)| (id.clone(), sale.score)).collect();
        assert_eq!(pushed["a"], 3);
        assert_eq!(pushed["b"], 1);
        assert_eq!(pushed["c"], 0);

        // Cursor is the max started_at observed
        assert_eq!(report.latest_timestamp, record_started_at(&call_record("a", "", 0, "answered")));
    }

    #[tokio::test]
    async fn second_sync_is_idempotent_without_new_ai_calls() {
        let calls = vec![call_record("a", "I'd like a quote for my kitchen", 0, "answered")];
        let h = harness(calls.clone(), &[("kitchen", &warm_json("Lead."))], true);

        h.service.sync_client(&h.user_id, false).await;
        let first = h.call_logs.list_for_user(&h.user_id).unwrap();
        h.service.sync_client(&h.user_id, false).await;
        let second = h.call_logs.list_for_user(&h.user_id).unwrap();

        assert_eq!(h.ai.call_count(), 1);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].score, second[0].score);
        assert_eq!(
            CallMeta::parse(&first[0].meta).category(),
            CallMeta::parse(&second[0].meta).category()
        );
    }

    #[tokio::test]
    async fn provider_rating_is_authoritative_on_incremental_sync() {
        let calls = vec![call_record("b", "Congratulations you won a cruise", 0, "answered")];
        let h = harness(calls, &[("cruise", r#"{"category": "spam", "summary": "Robocall."}"#)], true);

        h.service.sync_client(&h.user_id, false).await;
        assert_eq!(h.provider.sales().len(), 1);

        // The operator rates the call 5 stars at the provider
        h.provider.set_calls(vec![call_record("b", "Congratulations you won a cruise", 5, "answered")]);
        h.service.sync_client(&h.user_id, false).await;

        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].score, 5);
        assert_eq!(CallMeta::parse(&logs[0].meta).category(), Category::Converted);
        // No extra AI call, no extra provider push
        assert_eq!(h.ai.call_count(), 1);
        assert_eq!(h.provider.sales().len(), 1);
    }

    #[tokio::test]
    async fn rating_removed_at_source_resets_to_unreviewed() {
        let calls = vec![call_record("d", "", 4, "answered")];
        let h = harness(calls, &[], false);
        h.service.sync_client(&h.user_id, false).await;
        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        assert_eq!(logs[0].score, 4);

        h.provider.set_calls(vec![call_record("d", "", 0, "answered")]);
        h.service.sync_client(&h.user_id, false).await;
        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        assert_eq!(logs[0].score, 0);
        assert_eq!(CallMeta::parse(&logs[0].meta).category(), Category::Unreviewed);
    }

    #[tokio::test]
    async fn warm_voicemail_elevates_and_notifies_account_manager() {
        let calls = vec![call_record("vm1", "Hi, please call me back about a big roofing job", 0, "voicemail")];
        let h = harness(calls, &[("roofing", &warm_json("Roofing lead."))], false);

        h.service.sync_client(&h.user_id, false).await;
        // Notification emission is detached
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        assert_eq!(CallMeta::parse(&logs[0].meta).category(), Category::NeedsAttention);

        let inbox = h.notifications.list_for_user(&h.manager_id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].body.contains("Caller vm1"));
        assert!(inbox[0].link_url.as_deref().unwrap_or("").contains("call=vm1"));
    }

    #[tokio::test]
    async fn provider_failure_keeps_cursor_and_reports_error() {
        let calls = vec![call_record("a", "I'd like a quote for my kitchen", 0, "answered")];
        let h = harness(calls, &[("kitchen", &warm_json("Lead."))], false);
        h.service.sync_client(&h.user_id, false).await;
        let report_ok = h.service.sync_client(&h.user_id, false).await;
        let cursor = report_ok.latest_timestamp;

        h.provider.fail.store(true, Ordering::SeqCst);
        let report = h.service.sync_client(&h.user_id, false).await;
        assert!(!report.errors.is_empty());
        assert_eq!(report.latest_timestamp, None);

        // Stored cursor untouched
        h.provider.fail.store(false, Ordering::SeqCst);
        let report_after = h.service.sync_client(&h.user_id, false).await;
        assert_eq!(report_after.latest_timestamp, cursor);
    }

    #[tokio::test]
    async fn empty_first_page_completes_without_moving_cursor() {
        let h = harness(Vec::new(), &[], false);
        let report = h.service.sync_client(&h.user_id, false).await;
        assert!(report.errors.is_empty());
        assert_eq!(report.total_fetched, 0);
        assert_eq!(report.latest_timestamp, None);
    }

    #[tokio::test]
    async fn classify_limit_zero_leaves_records_unreviewed() {
        let calls = vec![call_record("a", "I'd like a quote for my kitchen", 0, "answered")];
        let config = Config { classify_limit: 0, ..Config::default() };
        let h = harness_with_config(calls, &[("kitchen", &warm_json("Lead."))], true, config);

        h.service.sync_client(&h.user_id, false).await;
        assert_eq!(h.ai.call_count(), 0);
        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        assert_eq!(CallMeta::parse(&logs[0].meta).category(), Category::Unreviewed);
        assert!(h.provider.sales().is_empty());
    }

    #[tokio::test]
    async fn records_without_text_get_fallback_categories() {
        let mut unanswered = call_record("m1", "", 0, "missed");
        unanswered["talk_time"] = json!(0);
        let calls = vec![unanswered, call_record("n1", "", 0, "answered")];
        let h = harness(calls, &[], false);

        h.service.sync_client(&h.user_id, false).await;
        assert_eq!(h.ai.call_count(), 0);
        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        let by_call: HashMap<_, _> = logs.iter().map(|l| (l.call_id.clone(), l)).collect();
        assert_eq!(CallMeta::parse(&by_call["m1"].meta).category(), Category::Unanswered);
        assert_eq!(CallMeta::parse(&by_call["n1"].meta).category(), Category::Neutral);
    }

    #[tokio::test]
    async fn repeat_callers_get_sequence_numbers() {
        let mut first = call_record("r1", "", 0, "answered");
        first["caller_number"] = json!("+15551234567");
        let h = harness(vec![first.clone()], &[], false);
        h.service.sync_client(&h.user_id, false).await;

        let mut second = call_record("r2", "", 0, "answered");
        second["caller_number"] = json!("+1 (555) 123-4567");
        h.provider.set_calls(vec![second]);
        h.service.sync_client(&h.user_id, false).await;

        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        let by_call: HashMap<_, _> = logs.iter().map(|l| (l.call_id.clone(), l)).collect();
        let meta = CallMeta::parse(&by_call["r2"].meta);
        assert_eq!(meta.caller_type(), Some("repeat"));
        assert_eq!(meta.call_sequence(), Some(2));
    }

    #[tokio::test]
    async fn active_client_match_marks_returning_customer_and_skips_archived() {
        let h = harness(Vec::new(), &[], false);
        let now = Utc::now().timestamp();
        h.active_clients
            .create(NewActiveClient {
                id: "ac-current".to_string(),
                owner_user_id: h.user_id.clone(),
                client_name: Some("Dana Whitfield".to_string()),
                client_phone: Some("(555) 123-4567".to_string()),
                client_email: None,
                source: None,
                funnel_data: None,
                archived_at: None,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        h.active_clients
            .create(NewActiveClient {
                id: "ac-former".to_string(),
                owner_user_id: h.user_id.clone(),
                client_name: Some("Marcus Webb".to_string()),
                client_phone: Some("555-765-4321".to_string()),
                client_email: None,
                source: None,
                funnel_data: None,
                archived_at: Some(now - 86_400),
                created_at: now - 10 * 86_400,
                updated_at: now,
            })
            .unwrap();

        // Punctuation differs from the stored number; normalization bridges it
        let mut current = call_record("c1", "", 0, "answered");
        current["caller_number"] = json!("555.123.4567");
        current.as_object_mut().unwrap().remove("caller_name");
        let mut former = call_record("c2", "", 0, "answered");
        former["caller_number"] = json!("(555) 765-4321");
        h.provider.set_calls(vec![current, former]);

        let report = h.service.sync_client(&h.user_id, false).await;
        assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);

        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        let by_call: HashMap<_, _> = logs.iter().map(|l| (l.call_id.clone(), l)).collect();

        let meta = CallMeta::parse(&by_call["c1"].meta);
        assert_eq!(meta.caller_type(), Some("returning_customer"));
        assert_eq!(
            meta.0.get("active_client_id").and_then(Value::as_str),
            Some("ac-current")
        );
        // Record carried no caller name; the client record supplies one
        assert_eq!(meta.caller_name(), Some("Dana Whitfield"));

        // Archived client: treated as an unknown caller
        let meta = CallMeta::parse(&by_call["c2"].meta);
        assert_eq!(meta.caller_type(), Some("new"));
        assert!(meta.0.get("active_client_id").is_none());
    }

    #[tokio::test]
    async fn rate_call_updates_locally_and_pushes() {
        let calls = vec![call_record("a", "", 0, "answered")];
        let h = harness(calls, &[], false);
        h.service.sync_client(&h.user_id, false).await;

        let warning = h.service.rate_call(&h.user_id, "a", 5).await.unwrap();
        assert!(warning.is_none());
        let logs = h.call_logs.list_for_user(&h.user_id).unwrap();
        assert_eq!(logs[0].score, 5);
        assert_eq!(CallMeta::parse(&logs[0].meta).category(), Category::Converted);
        assert_eq!(h.provider.sales().last().unwrap().1.score, 5);

        assert!(matches!(
            h.service.rate_call(&h.user_id, "a", 6).await,
            Err(RatingError::InvalidScore)
        ));
        assert!(matches!(
            h.service.rate_call(&h.user_id, "missing", 3).await,
            Err(RatingError::NotFound)
        ));
    }

    #[tokio::test]
    async fn reset_and_reload_replays_full_history() {
        let calls = vec![call_record("a", "", 0, "answered")];
        let h = harness(calls, &[], false);
        h.service.sync_client(&h.user_id, false).await;
        assert_eq!(h.call_logs.list_for_user(&h.user_id).unwrap().len(), 1);

        let report = h.service.reset_and_reload(&h.user_id).await.unwrap();
        assert_eq!(report.processed_count, 1);
        assert_eq!(h.call_logs.list_for_user(&h.user_id).unwrap().len(), 1);

        // Fourth manual reset in the window hits the limiter
        h.service.reset_and_reload(&h.user_id).await.unwrap();
        h.service.reset_and_reload(&h.user_id).await.unwrap();
        assert!(matches!(
            h.service.reset_and_reload(&h.user_id).await,
            Err(RatingError::RateLimited)
        ));
    }
}
