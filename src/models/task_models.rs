use diesel::prelude::*;
use crate::schema::{
    task_groups, task_items, task_assignees, task_updates,
    task_board_automations, task_global_automations, task_automation_runs,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    StatusChange,
    AssigneeAdded,
    DueDateRelative,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::StatusChange => "status_change",
            TriggerType::AssigneeAdded => "assignee_added",
            TriggerType::DueDateRelative => "due_date_relative",
        }
    }

    pub fn parse(s: &str) -> Option<TriggerType> {
        match s {
            "status_change" => Some(TriggerType::StatusChange),
            "assignee_added" => Some(TriggerType::AssigneeAdded),
            "due_date_relative" => Some(TriggerType::DueDateRelative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    NotifyAdmins,
    NotifyAssignees,
    SetStatus,
    SetNeedsAttention,
    AddUpdate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::NotifyAdmins => "notify_admins",
            ActionType::NotifyAssignees => "notify_assignees",
            ActionType::SetStatus => "set_status",
            ActionType::SetNeedsAttention => "set_needs_attention",
            ActionType::AddUpdate => "add_update",
        }
    }

    pub fn parse(s: &str) -> Option<ActionType> {
        match s {
            "notify_admins" => Some(ActionType::NotifyAdmins),
            "notify_assignees" => Some(ActionType::NotifyAssignees),
            "set_status" => Some(ActionType::SetStatus),
            "set_needs_attention" => Some(ActionType::SetNeedsAttention),
            "add_update" => Some(ActionType::AddUpdate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Fired,
    Skipped,
    Error,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Fired => "fired",
            RunOutcome::Skipped => "skipped",
            RunOutcome::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationScope {
    Board,
    Global,
}

impl AutomationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationScope::Board => "board",
            AutomationScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_groups)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskGroup {
    pub id: String,
    pub board_id: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskItem {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub status: String, // board-scoped label, compared by exact text
    pub due_date: Option<String>, // YYYY-MM-DD in the operational timezone
    pub is_voicemail: bool,
    pub needs_attention: bool,
    pub archived_at: Option<i64>,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_assignees)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskAssignee {
    pub item_id: String,
    pub user_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_updates)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskUpdate {
    pub id: String,
    pub item_id: String,
    pub author: String, // user id, or "automation" for engine-authored rows
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_board_automations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskBoardAutomation {
    pub id: String,
    pub board_id: String,
    pub name: String,
    pub trigger_type: String,
    pub trigger_config: String, // json bag, shape depends on trigger_type
    pub action_type: String,
    pub action_config: String, // json bag, shape depends on action_type
    pub is_active: bool,
    pub created_by: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_global_automations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskGlobalAutomation {
    pub id: String,
    pub name: String,
    pub trigger_type: String,
    pub trigger_config: String,
    pub action_type: String,
    pub action_config: String,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: i64,
}

/// Board-scoped and global rules merged into one shape so the engine can
/// evaluate them in a single `created_at`-ordered pass.
#[derive(Debug, Clone)]
pub struct AutomationRule {
    pub scope: AutomationScope,
    pub id: String,
    pub board_id: Option<String>,
    pub name: String,
    pub trigger_type: String,
    pub trigger_config: String,
    pub action_type: String,
    pub action_config: String,
    pub created_at: i64,
}

impl From<TaskBoardAutomation> for AutomationRule {
    fn from(a: TaskBoardAutomation) -> Self {
        AutomationRule {
            scope: AutomationScope::Board,
            id: a.id,
            board_id: Some(a.board_id),
            name: a.name,
            trigger_type: a.trigger_type,
            trigger_config: a.trigger_config,
            action_type: a.action_type,
            action_config: a.action_config,
            created_at: a.created_at,
        }
    }
}

impl From<TaskGlobalAutomation> for AutomationRule {
    fn from(a: TaskGlobalAutomation) -> Self {
        AutomationRule {
            scope: AutomationScope::Global,
            id: a.id,
            board_id: None,
            name: a.name,
            trigger_type: a.trigger_type,
            trigger_config: a.trigger_config,
            action_type: a.action_type,
            action_config: a.action_config,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_automation_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskAutomationRun {
    pub id: String,
    pub scope: String,
    pub automation_id: String,
    pub board_id: Option<String>,
    pub item_id: String,
    pub ran_at: i64,
    pub outcome: String,
    pub detail: String, // json bag
}

#[derive(Insertable)]
#[diesel(table_name = task_automation_runs)]
pub struct NewTaskAutomationRun {
    pub id: String,
    pub scope: String,
    pub automation_id: String,
    pub board_id: Option<String>,
    pub item_id: String,
    pub ran_at: i64,
    pub outcome: String,
    pub detail: String,
}
