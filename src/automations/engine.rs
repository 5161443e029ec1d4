use std::sync::Arc;
use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use diesel::result::Error as DieselError;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::task_models::{
    ActionType, AutomationRule, NewTaskAutomationRun, RunOutcome, TaskAssignee, TaskItem,
    TaskUpdate, TriggerType,
};
use crate::repositories::task_repository::TaskRepository;
use crate::repositories::user_repository::UserRepository;
use crate::utils::detach::DetachedPool;
use crate::utils::notify::{NotificationRequest, NotificationSink};

pub const AUTOMATION_AUTHOR: &str = "automation";
const DUE_DAYS_RANGE: std::ops::RangeInclusive<i64> = -365..=365;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("unknown trigger type: {0}")]
    UnknownTrigger(String),
    #[error("unknown action type: {0}")]
    UnknownAction(String),
    #[error("invalid trigger config: {0}")]
    InvalidTrigger(String),
    #[error("invalid action config: {0}")]
    InvalidAction(String),
}

/// Validates a rule before it is stored. The engine still re-checks config
/// at execution time, since stored rows may predate stricter validation.
pub fn validate_rule(
    trigger_type: &str,
    trigger_config: &str,
    action_type: &str,
    action_config: &str,
) -> Result<(), RuleError> {
    let trigger = TriggerType::parse(trigger_type)
        .ok_or_else(|| RuleError::UnknownTrigger(trigger_type.to_string()))?;
    let action = ActionType::parse(action_type)
        .ok_or_else(|| RuleError::UnknownAction(action_type.to_string()))?;

    let trigger_bag: Value = serde_json::from_str(trigger_config)
        .map_err(|e| RuleError::InvalidTrigger(e.to_string()))?;
    if trigger == TriggerType::DueDateRelative {
        let days = trigger_bag
            .get("days_from_due")
            .and_then(Value::as_i64)
            .ok_or_else(|| RuleError::InvalidTrigger("days_from_due must be an integer".to_string()))?;
        if !DUE_DAYS_RANGE.contains(&days) {
            return Err(RuleError::InvalidTrigger(format!(
                "days_from_due {} out of range",
                days
            )));
        }
    }

    let action_bag: Value = serde_json::from_str(action_config)
        .map_err(|e| RuleError::InvalidAction(e.to_string()))?;
    match action {
        ActionType::SetStatus => {
            let status = action_bag.get("status").and_then(Value::as_str).unwrap_or("");
            if status.is_empty() {
                return Err(RuleError::InvalidAction("status must be a non-empty string".to_string()));
            }
        }
        ActionType::SetNeedsAttention => {
            if action_bag.get("value").and_then(Value::as_bool).is_none() {
                return Err(RuleError::InvalidAction("value must be a boolean".to_string()));
            }
        }
        ActionType::AddUpdate => {
            let content = action_bag.get("content").and_then(Value::as_str).unwrap_or("");
            if content.is_empty() {
                return Err(RuleError::InvalidAction("content must be a non-empty string".to_string()));
            }
        }
        ActionType::NotifyAdmins | ActionType::NotifyAssignees => {}
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum AutomationEvent {
    StatusChange { actor: String, old_status: String, new_status: String },
    AssigneeAdded { actor: String, user_id: String },
}

impl AutomationEvent {
    fn trigger_type(&self) -> TriggerType {
        match self {
            AutomationEvent::StatusChange { .. } => TriggerType::StatusChange,
            AutomationEvent::AssigneeAdded { .. } => TriggerType::AssigneeAdded,
        }
    }

    fn actor(&self) -> &str {
        match self {
            AutomationEvent::StatusChange { actor, .. } => actor,
            AutomationEvent::AssigneeAdded { actor, .. } => actor,
        }
    }
}

/// Evaluates automation rules against task events and the hourly due-date
/// pass. Engine-originated status writes go straight to the repository, so
/// a `set_status` action can never re-trigger a `status_change` rule.
pub struct AutomationEngine {
    tasks: Arc<TaskRepository>,
    users: Arc<UserRepository>,
    sink: Arc<NotificationSink>,
    detach: Arc<DetachedPool>,
    timezone: Tz,
}

impl AutomationEngine {
    pub fn new(
        tasks: Arc<TaskRepository>,
        users: Arc<UserRepository>,
        sink: Arc<NotificationSink>,
        detach: Arc<DetachedPool>,
        timezone: Tz,
    ) -> Self {
        Self { tasks, users, sink, detach, timezone }
    }

    /// User-facing status change: persists the new status, then dispatches
    /// the event off the caller's path.
    pub fn change_status(
        self: &Arc<Self>,
        item_id: &str,
        new_status: &str,
        actor_user_id: &str,
        now: i64,
    ) -> Result<(), DieselError> {
        let item = match self.tasks.get_item(item_id)? {
            Some(item) => item,
            None => return Err(DieselError::NotFound),
        };
        self.tasks.update_status(item_id, new_status, now)?;
        let event = AutomationEvent::StatusChange {
            actor: actor_user_id.to_string(),
            old_status: item.status.clone(),
            new_status: new_status.to_string(),
        };
        self.dispatch_detached(item_id.to_string(), event, now);
        Ok(())
    }

    /// Adds an assignee; the event fires only when the row is new.
    pub fn assign(
        self: &Arc<Self>,
        item_id: &str,
        user_id: &str,
        actor_user_id: &str,
        now: i64,
    ) -> Result<bool, DieselError> {
        let inserted = self.tasks.add_assignee(TaskAssignee {
            item_id: item_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
        })?;
        if inserted == 0 {
            return Ok(false);
        }
        let event = AutomationEvent::AssigneeAdded {
            actor: actor_user_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.dispatch_detached(item_id.to_string(), event, now);
        Ok(true)
    }

    fn dispatch_detached(self: &Arc<Self>, item_id: String, event: AutomationEvent, now: i64) {
        let engine = Arc::clone(self);
        self.detach.spawn("automation_event", async move {
            engine
                .dispatch_event(&item_id, &event, now)
                .await
                .map_err(|e| e.to_string())
        });
    }

    /// Runs every active rule matching the event's trigger type, in
    /// `created_at` order across board and global scopes. Each considered
    /// rule leaves exactly one audit row.
    pub async fn dispatch_event(
        &self,
        item_id: &str,
        event: &AutomationEvent,
        now: i64,
    ) -> Result<(), DieselError> {
        let Some(item) = self.tasks.get_item(item_id)? else {
            info!("Skipping automation dispatch: item {} no longer exists", item_id);
            return Ok(());
        };
        let board_id = self.tasks.board_id_for_item(&item)?;
        let rules = self.merged_rules(board_id.as_deref())?;

        for rule in rules {
            if TriggerType::parse(&rule.trigger_type) != Some(event.trigger_type()) {
                continue;
            }
            if let Some(reason) = trigger_mismatch(&rule, event) {
                let detail = json!({"reason": reason, "actor": event.actor()});
                self.record_run(&rule, &item.id, now, RunOutcome::Skipped, detail)?;
                continue;
            }
            self.execute_and_record(&rule, &item, Some(event.actor()), now).await?;
        }
        Ok(())
    }

    /// Hourly pass over due-date rules. A rule with `days_from_due` of 1
    /// fires the day before an item is due; -1 fires the day after. Within
    /// one local day each rule/item pair fires at most once; the dedup hit
    /// is silent.
    pub async fn run_due_date_automations(&self, now: i64) -> Result<(), DieselError> {
        let Some(today) = self.local_date(now) else {
            error!("Could not resolve local date for due-date automation pass");
            return Ok(());
        };
        let (day_start, day_end) = self.local_day_window(today);
        let rules = self.merged_rules_all()?;

        for rule in rules {
            if TriggerType::parse(&rule.trigger_type) != Some(TriggerType::DueDateRelative) {
                continue;
            }
            let bag: Value = serde_json::from_str(&rule.trigger_config).unwrap_or(Value::Null);
            let Some(days) = bag.get("days_from_due").and_then(Value::as_i64) else {
                continue;
            };
            // Qualifying due date = today + days_from_due
            let target = today + chrono::Duration::days(days);
            let target = target.format("%Y-%m-%d").to_string();

            for item in self.tasks.items_due_on(&target)? {
                let item_board = self.tasks.board_id_for_item(&item)?;
                if rule.board_id.is_some() && rule.board_id != item_board {
                    continue;
                }
                if self.tasks.has_run_between(&rule.id, &item.id, day_start, day_end)? {
                    continue;
                }
                self.execute_and_record(&rule, &item, None, now).await?;
            }
        }
        Ok(())
    }

    /// Retention sweep for archived items.
    pub fn purge_archived(&self, retention_days: i64) -> Result<usize, DieselError> {
        let cutoff = Utc::now().timestamp() - retention_days * 86_400;
        let purged = self.tasks.purge_archived_before(cutoff)?;
        if purged > 0 {
            info!("Purged {} archived task item(s)", purged);
        }
        Ok(purged)
    }

    fn merged_rules(&self, board_id: Option<&str>) -> Result<Vec<AutomationRule>, DieselError> {
        let mut rules: Vec<AutomationRule> = Vec::new();
        if let Some(board_id) = board_id {
            rules.extend(
                self.tasks
                    .active_board_automations(board_id)?
                    .into_iter()
                    .map(AutomationRule::from),
            );
        }
        rules.extend(
            self.tasks
                .active_global_automations()?
                .into_iter()
                .map(AutomationRule::from),
        );
        rules.sort_by_key(|rule| rule.created_at);
        Ok(rules)
    }

    // Due-date pass considers every board's rules; board scoping is applied
    // per matched item instead.
    fn merged_rules_all(&self) -> Result<Vec<AutomationRule>, DieselError> {
        let mut rules: Vec<AutomationRule> = self
            .tasks
            .all_active_board_automations()?
            .into_iter()
            .map(AutomationRule::from)
            .collect();
        rules.extend(
            self.tasks
                .active_global_automations()?
                .into_iter()
                .map(AutomationRule::from),
        );
        rules.sort_by_key(|rule| rule.created_at);
        Ok(rules)
    }

    async fn execute_and_record(
        &self,
        rule: &AutomationRule,
        item: &TaskItem,
        actor: Option<&str>,
        now: i64,
    ) -> Result<(), DieselError> {
        match self.execute_action(rule, item, now).await {
            Ok(mut detail) => {
                info!("Automation {} fired on item {}", rule.name, item.id);
                if let (Some(actor), Some(map)) = (actor, detail.as_object_mut()) {
                    map.insert("actor".to_string(), json!(actor));
                }
                self.record_run(rule, &item.id, now, RunOutcome::Fired, detail)
            }
            Err(e) => {
                error!("Automation {} errored on item {}: {}", rule.name, item.id, e);
                let mut detail = json!({"error": e});
                if let (Some(actor), Some(map)) = (actor, detail.as_object_mut()) {
                    map.insert("actor".to_string(), json!(actor));
                }
                self.record_run(rule, &item.id, now, RunOutcome::Error, detail)
            }
        }
    }

    async fn execute_action(
        &self,
        rule: &AutomationRule,
        item: &TaskItem,
        now: i64,
    ) -> Result<Value, String> {
        let action = ActionType::parse(&rule.action_type)
            .ok_or_else(|| format!("unknown action type {}", rule.action_type))?;
        let bag: Value = serde_json::from_str(&rule.action_config)
            .map_err(|e| format!("bad action config: {}", e))?;

        match action {
            ActionType::NotifyAdmins => {
                let admins = self.users.get_admins().map_err(|e| e.to_string())?;
                let count = admins.len();
                for admin in admins {
                    self.notify(&bag, item, admin.id).await?;
                }
                Ok(json!({"action": "notify_admins", "recipients": count}))
            }
            ActionType::NotifyAssignees => {
                let assignees = self
                    .tasks
                    .assignees_for_item(&item.id)
                    .map_err(|e| e.to_string())?;
                let count = assignees.len();
                for assignee in assignees {
                    self.notify(&bag, item, assignee.user_id).await?;
                }
                Ok(json!({"action": "notify_assignees", "recipients": count}))
            }
            ActionType::SetStatus => {
                let status = bag
                    .get("status")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| "set_status without a status".to_string())?;
                // Direct repository write; engine-origin changes do not
                // dispatch further events
                self.tasks
                    .update_status(&item.id, status, now)
                    .map_err(|e| e.to_string())?;
                Ok(json!({"action": "set_status", "status": status}))
            }
            ActionType::SetNeedsAttention => {
                let value = bag
                    .get("value")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| "set_needs_attention without a boolean value".to_string())?;
                self.tasks
                    .set_needs_attention(&item.id, value, now)
                    .map_err(|e| e.to_string())?;
                Ok(json!({"action": "set_needs_attention", "value": value}))
            }
            ActionType::AddUpdate => {
                let content = bag
                    .get("content")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| "add_update without content".to_string())?;
                self.tasks
                    .insert_update(TaskUpdate {
                        id: Uuid::new_v4().to_string(),
                        item_id: item.id.clone(),
                        author: AUTOMATION_AUTHOR.to_string(),
                        content: content.to_string(),
                        created_at: now,
                    })
                    .map_err(|e| e.to_string())?;
                Ok(json!({"action": "add_update"}))
            }
        }
    }

    // Config may override title, body and link_url; anything missing falls
    // back to a status line, the item name and the item's board link.
    async fn notify(&self, bag: &Value, item: &TaskItem, user_id: String) -> Result<(), String> {
        let link = match bag.get("link_url").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            Some(link) => link.to_string(),
            None => {
                let board_id = self
                    .tasks
                    .board_id_for_item(item)
                    .map_err(|e| e.to_string())?;
                match &board_id {
                    Some(board) => format!("/tasks?board={}&item={}", board, item.id),
                    None => format!("/tasks?item={}", item.id),
                }
            }
        };
        let title = bag
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Task status updated: {}", item.status));
        let body = bag
            .get("body")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| item.name.clone());
        let request = NotificationRequest {
            user_id,
            title,
            body,
            link_url: Some(link),
            meta: json!({"item_id": item.id}),
        };
        self.sink.create(request).await.map_err(|e| e.to_string())
    }

    fn record_run(
        &self,
        rule: &AutomationRule,
        item_id: &str,
        now: i64,
        outcome: RunOutcome,
        detail: Value,
    ) -> Result<(), DieselError> {
        self.tasks.insert_run(NewTaskAutomationRun {
            id: Uuid::new_v4().to_string(),
            scope: rule.scope.as_str().to_string(),
            automation_id: rule.id.clone(),
            board_id: rule.board_id.clone(),
            item_id: item_id.to_string(),
            ran_at: now,
            outcome: outcome.as_str().to_string(),
            detail: detail.to_string(),
        })
    }

    fn local_date(&self, now: i64) -> Option<NaiveDate> {
        self.timezone
            .timestamp_opt(now, 0)
            .single()
            .map(|dt| dt.date_naive())
    }

    fn local_day_window(&self, day: NaiveDate) -> (i64, i64) {
        let start = day
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| self.timezone.from_local_datetime(&dt).earliest())
            .map(|dt| dt.timestamp())
            .unwrap_or(0);
        (start, start + 86_400)
    }
}

/// Checks the event against the rule's trigger predicate. `None` means the
/// rule fires; `Some(reason)` becomes the skipped audit row's detail.
fn trigger_mismatch(rule: &AutomationRule, event: &AutomationEvent) -> Option<String> {
    let bag: Value = serde_json::from_str(&rule.trigger_config).unwrap_or(Value::Null);
    match event {
        AutomationEvent::StatusChange { old_status, new_status, .. } => {
            if let Some(to) = bag.get("to_status").and_then(Value::as_str) {
                if to != new_status {
                    return Some(format!("to_status {} != {}", to, new_status));
                }
            }
            if let Some(from) = bag.get("from_status").and_then(Value::as_str) {
                if from != old_status {
                    return Some(format!("from_status {} != {}", from, old_status));
                }
            }
            None
        }
        AutomationEvent::AssigneeAdded { user_id, .. } => {
            if let Some(expected) = bag.get("user_id").and_then(Value::as_str) {
                if expected != user_id {
                    return Some(format!("user_id {} != {}", expected, user_id));
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task_models::{TaskBoardAutomation, TaskGlobalAutomation, TaskGroup};
    use crate::repositories::notification_repository::NotificationRepository;
    use crate::utils::test_support::{new_user, test_pool};

    struct Harness {
        engine: Arc<AutomationEngine>,
        tasks: Arc<TaskRepository>,
        notifications: Arc<NotificationRepository>,
        users: Arc<UserRepository>,
        admin_id: String,
    }

    fn harness() -> Harness {
        let pool = test_pool();
        let tasks = Arc::new(TaskRepository::new(pool.clone()));
        let users = Arc::new(UserRepository::new(pool.clone()));
        let notifications = Arc::new(NotificationRepository::new(pool));
        let admin = new_user("admin");
        let admin_id = admin.id.clone();
        users.create_user(admin).unwrap();
        let sink = Arc::new(NotificationSink::new(Arc::clone(&notifications), Arc::clone(&users), None));
        let engine = Arc::new(AutomationEngine::new(
            Arc::clone(&tasks),
            Arc::clone(&users),
            sink,
            Arc::new(DetachedPool::new(4)),
            chrono_tz::UTC,
        ));
        Harness { engine, tasks, notifications, users, admin_id }
    }

    fn seed_item(h: &Harness, item_id: &str, due_date: Option<&str>) {
        let now = Utc::now().timestamp();
        let group_id = format!("grp-{}", item_id);
        h.tasks
            .create_group(TaskGroup {
                id: group_id.clone(),
                board_id: "board-1".to_string(),
                name: "This Week".to_string(),
                created_at: now,
            })
            .unwrap();
        h.tasks
            .create_item(TaskItem {
                id: item_id.to_string(),
                group_id,
                name: "Follow up with Dana".to_string(),
                status: "todo".to_string(),
                due_date: due_date.map(str::to_string),
                is_voicemail: false,
                needs_attention: false,
                archived_at: None,
                created_by: "u1".to_string(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    fn board_rule(
        h: &Harness,
        id: &str,
        trigger_type: &str,
        trigger_config: &str,
        action_type: &str,
        action_config: &str,
        created_at: i64,
    ) {
        h.tasks
            .create_board_automation(TaskBoardAutomation {
                id: id.to_string(),
                board_id: "board-1".to_string(),
                name: format!("rule {}", id),
                trigger_type: trigger_type.to_string(),
                trigger_config: trigger_config.to_string(),
                action_type: action_type.to_string(),
                action_config: action_config.to_string(),
                is_active: true,
                created_by: "u1".to_string(),
                created_at,
            })
            .unwrap();
    }

    #[test]
    fn validation_rejects_malformed_rules() {
        assert!(validate_rule("status_change", "{}", "notify_admins", "{}").is_ok());
        assert!(matches!(
            validate_rule("on_create", "{}", "notify_admins", "{}"),
            Err(RuleError::UnknownTrigger(_))
        ));
        assert!(matches!(
            validate_rule("status_change", "{}", "escalate", "{}"),
            Err(RuleError::UnknownAction(_))
        ));
        assert!(matches!(
            validate_rule("due_date_relative", "{}", "notify_admins", "{}"),
            Err(RuleError::InvalidTrigger(_))
        ));
        assert!(matches!(
            validate_rule("due_date_relative", r#"{"days_from_due": 400}"#, "notify_admins", "{}"),
            Err(RuleError::InvalidTrigger(_))
        ));
        assert!(validate_rule("due_date_relative", r#"{"days_from_due": -1}"#, "notify_admins", "{}").is_ok());
        assert!(matches!(
            validate_rule("status_change", "{}", "set_status", "{}"),
            Err(RuleError::InvalidAction(_))
        ));
        assert!(matches!(
            validate_rule("status_change", "{}", "set_needs_attention", r#"{"value": "yes"}"#),
            Err(RuleError::InvalidAction(_))
        ));
        assert!(matches!(
            validate_rule("status_change", "{}", "add_update", r#"{"content": ""}"#),
            Err(RuleError::InvalidAction(_))
        ));
    }

    #[tokio::test]
    async fn trigger_predicate_mismatch_leaves_skipped_row() {
        let h = harness();
        seed_item(&h, "t1", None);
        board_rule(&h, "r1", "status_change", r#"{"to_status": "done"}"#, "notify_admins", "{}", 1);

        let event = AutomationEvent::StatusChange {
            actor: "u-actor".to_string(),
            old_status: "todo".to_string(),
            new_status: "in_progress".to_string(),
        };
        h.engine.dispatch_event("t1", &event, 100).await.unwrap();
        let runs = h.tasks.runs_for_item("t1").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, "skipped");
        assert!(runs[0].detail.contains("u-actor"));

        let event = AutomationEvent::StatusChange {
            actor: "u-actor".to_string(),
            old_status: "in_progress".to_string(),
            new_status: "done".to_string(),
        };
        h.engine.dispatch_event("t1", &event, 200).await.unwrap();
        let runs = h.tasks.runs_for_item("t1").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].outcome, "fired");
        assert!(runs[1].detail.contains("u-actor"));
        assert_eq!(h.notifications.list_for_user(&h.admin_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn engine_set_status_does_not_cascade() {
        let h = harness();
        seed_item(&h, "t2", None);
        board_rule(&h, "r1", "status_change", r#"{"to_status": "done"}"#, "set_status", r#"{"status": "archived"}"#, 1);
        board_rule(&h, "r2", "status_change", r#"{"to_status": "archived"}"#, "add_update", r#"{"content": "archived note"}"#, 2);

        h.engine.change_status("t2", "done", "u1", 100).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let item = h.tasks.get_item("t2").unwrap().unwrap();
        assert_eq!(item.status, "archived");
        // r2 saw the user event (new_status done, mismatch) but never an
        // engine-origin archived event
        let updates = h.tasks.updates_for_item("t2").unwrap();
        assert!(updates.is_empty());
        let runs = h.tasks.runs_for_item("t2").unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn rules_execute_in_created_at_order_across_scopes() {
        let h = harness();
        seed_item(&h, "t3", None);
        board_rule(&h, "r-late", "status_change", "{}", "add_update", r#"{"content": "second"}"#, 20);
        h.tasks
            .create_global_automation(TaskGlobalAutomation {
                id: "g-early".to_string(),
                name: "global first".to_string(),
                trigger_type: "status_change".to_string(),
                trigger_config: "{}".to_string(),
                action_type: "add_update".to_string(),
                action_config: r#"{"content": "first"}"#.to_string(),
                is_active: true,
                created_by: "u1".to_string(),
                created_at: 10,
            })
            .unwrap();

        let event = AutomationEvent::StatusChange {
            actor: "u1".to_string(),
            old_status: "todo".to_string(),
            new_status: "done".to_string(),
        };
        h.engine.dispatch_event("t3", &event, 100).await.unwrap();
        let updates = h.tasks.updates_for_item("t3").unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].author, AUTOMATION_AUTHOR);
        // same created_at timestamp; recover execution order from content
        let contents: Vec<&str> = updates.iter().map(|u| u.content.as_str()).collect();
        assert!(contents.contains(&"first") && contents.contains(&"second"));
        let runs = h.tasks.runs_for_item("t3").unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|run| run.outcome == "fired"));
    }

    #[tokio::test]
    async fn rule_error_is_isolated_and_audited() {
        let h = harness();
        seed_item(&h, "t4", None);
        // Stored before stricter validation: set_status without a status
        board_rule(&h, "r-bad", "status_change", "{}", "set_status", "{}", 1);
        board_rule(&h, "r-ok", "status_change", "{}", "add_update", r#"{"content": "still ran"}"#, 2);

        let event = AutomationEvent::StatusChange {
            actor: "u1".to_string(),
            old_status: "todo".to_string(),
            new_status: "done".to_string(),
        };
        h.engine.dispatch_event("t4", &event, 100).await.unwrap();
        let runs = h.tasks.runs_for_item("t4").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs.iter().filter(|run| run.outcome == "error").count(), 1);
        assert_eq!(runs.iter().filter(|run| run.outcome == "fired").count(), 1);
        assert_eq!(h.tasks.updates_for_item("t4").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn assignee_added_notifies_the_new_assignee() {
        let h = harness();
        seed_item(&h, "t5", None);
        let member = new_user("member");
        let member_id = member.id.clone();
        h.users.create_user(member).unwrap();
        board_rule(
            &h,
            "r1",
            "assignee_added",
            "{}",
            "notify_assignees",
            r#"{"title": "New assignment", "body": "You were assigned"}"#,
            1,
        );

        assert!(h.engine.assign("t5", &member_id, "u1", 100).unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let inbox = h.notifications.list_for_user(&member_id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "New assignment");
        assert_eq!(inbox[0].body, "You were assigned");
        assert!(inbox[0].link_url.as_deref().unwrap_or("").contains("board=board-1"));
        assert!(inbox[0].link_url.as_deref().unwrap_or("").contains("item=t5"));

        // duplicate assignment: absorbed, no second event
        assert!(!h.engine.assign("t5", &member_id, "u1", 200).unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.notifications.list_for_user(&member_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notification_falls_back_to_status_title_item_body_and_board_link() {
        let h = harness();
        seed_item(&h, "t7", None);
        board_rule(&h, "r1", "status_change", "{}", "notify_admins", "{}", 1);

        h.engine.change_status("t7", "done", "u1", 100).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let inbox = h.notifications.list_for_user(&h.admin_id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "Task status updated: done");
        assert_eq!(inbox[0].body, "Follow up with Dana");
        assert_eq!(
            inbox[0].link_url.as_deref(),
            Some("/tasks?board=board-1&item=t7")
        );
    }

    #[tokio::test]
    async fn notification_link_override_wins_over_board_link() {
        let h = harness();
        seed_item(&h, "t8", None);
        board_rule(
            &h,
            "r1",
            "status_change",
            "{}",
            "notify_admins",
            r#"{"link_url": "/inbox/review"}"#,
            1,
        );

        h.engine.change_status("t8", "done", "u1", 100).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let inbox = h.notifications.list_for_user(&h.admin_id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].link_url.as_deref(), Some("/inbox/review"));
    }

    #[tokio::test]
    async fn due_date_pass_fires_once_per_day_per_rule_and_item() {
        let h = harness();
        let now = Utc::now().timestamp();
        // days_from_due of -1 targets items that were due yesterday
        let yesterday = (Utc::now().date_naive() - chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        seed_item(&h, "t6", Some(&yesterday));
        board_rule(
            &h,
            "r1",
            "due_date_relative",
            r#"{"days_from_due": -1}"#,
            "set_needs_attention",
            r#"{"value": true}"#,
            1,
        );

        h.engine.run_due_date_automations(now).await.unwrap();
        let runs = h.tasks.runs_for_item("t6").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, "fired");
        assert!(h.tasks.get_item("t6").unwrap().unwrap().needs_attention);

        // An hour later within the same day: silent dedup, no extra row
        h.engine.run_due_date_automations(now + 3600).await.unwrap();
        assert_eq!(h.tasks.runs_for_item("t6").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn due_date_pass_ignores_items_on_other_dates_and_archived() {
        let h = harness();
        let now = Utc::now().timestamp();
        let yesterday = (Utc::now().date_naive() - chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        let tomorrow = (Utc::now().date_naive() + chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        // Not due yesterday: a -1 rule must leave it alone
        seed_item(&h, "ahead", Some(&tomorrow));
        seed_item(&h, "gone", Some(&yesterday));
        h.tasks.archive_item("gone", now).unwrap();
        board_rule(
            &h,
            "r1",
            "due_date_relative",
            r#"{"days_from_due": -1}"#,
            "notify_admins",
            "{}",
            1,
        );

        h.engine.run_due_date_automations(now).await.unwrap();
        assert!(h.tasks.runs_for_item("ahead").unwrap().is_empty());
        assert!(h.tasks.runs_for_item("gone").unwrap().is_empty());
    }
}
