use diesel::prelude::*;
use diesel::result::Error as DieselError;
use crate::{
    models::task_models::{
        TaskGroup, TaskItem, TaskAssignee, TaskUpdate,
        TaskBoardAutomation, TaskGlobalAutomation, TaskAutomationRun, NewTaskAutomationRun,
    },
    schema::{
        task_groups, task_items, task_assignees, task_updates,
        task_board_automations, task_global_automations, task_automation_runs,
    },
    DbPool,
};

pub struct TaskRepository {
    pool: DbPool,
}

impl TaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn create_group(&self, group: TaskGroup) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(task_groups::table)
            .values(&group)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn create_item(&self, item: TaskItem) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(task_items::table)
            .values(&item)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_item(&self, item_id: &str) -> Result<Option<TaskItem>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let item = task_items::table
            .find(item_id)
            .first::<TaskItem>(&mut conn)
            .optional()?;
        Ok(item)
    }

    // Items belong to groups, groups to boards
    pub fn board_id_for_item(&self, item: &TaskItem) -> Result<Option<String>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let group = task_groups::table
            .find(&item.group_id)
            .first::<TaskGroup>(&mut conn)
            .optional()?;
        Ok(group.map(|g| g.board_id))
    }

    pub fn update_status(&self, item_id: &str, status: &str, now: i64) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(task_items::table.find(item_id))
            .set((task_items::status.eq(status), task_items::updated_at.eq(now)))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn set_needs_attention(&self, item_id: &str, value: bool, now: i64) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(task_items::table.find(item_id))
            .set((task_items::needs_attention.eq(value), task_items::updated_at.eq(now)))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn archive_item(&self, item_id: &str, now: i64) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(task_items::table.find(item_id))
            .set((task_items::archived_at.eq(now), task_items::updated_at.eq(now)))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_update(&self, update: TaskUpdate) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(task_updates::table)
            .values(&update)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn updates_for_item(&self, item_id: &str) -> Result<Vec<TaskUpdate>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let updates = task_updates::table
            .filter(task_updates::item_id.eq(item_id))
            .order(task_updates::created_at.asc())
            .load::<TaskUpdate>(&mut conn)?;
        Ok(updates)
    }

    pub fn add_assignee(&self, assignee: TaskAssignee) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let inserted = diesel::insert_into(task_assignees::table)
            .values(&assignee)
            .on_conflict((task_assignees::item_id, task_assignees::user_id))
            .do_nothing()
            .execute(&mut conn)?;
        Ok(inserted)
    }

    pub fn assignees_for_item(&self, item_id: &str) -> Result<Vec<TaskAssignee>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let assignees = task_assignees::table
            .filter(task_assignees::item_id.eq(item_id))
            .load::<TaskAssignee>(&mut conn)?;
        Ok(assignees)
    }

    pub fn create_board_automation(&self, automation: TaskBoardAutomation) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(task_board_automations::table)
            .values(&automation)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn create_global_automation(&self, automation: TaskGlobalAutomation) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(task_global_automations::table)
            .values(&automation)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn active_board_automations(&self, board_id: &str) -> Result<Vec<TaskBoardAutomation>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let automations = task_board_automations::table
            .filter(task_board_automations::board_id.eq(board_id))
            .filter(task_board_automations::is_active.eq(true))
            .order(task_board_automations::created_at.asc())
            .load::<TaskBoardAutomation>(&mut conn)?;
        Ok(automations)
    }

    // Due-date sweeps look at every board's rules in one pass
    pub fn all_active_board_automations(&self) -> Result<Vec<TaskBoardAutomation>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let automations = task_board_automations::table
            .filter(task_board_automations::is_active.eq(true))
            .order(task_board_automations::created_at.asc())
            .load::<TaskBoardAutomation>(&mut conn)?;
        Ok(automations)
    }

    pub fn active_global_automations(&self) -> Result<Vec<TaskGlobalAutomation>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let automations = task_global_automations::table
            .filter(task_global_automations::is_active.eq(true))
            .order(task_global_automations::created_at.asc())
            .load::<TaskGlobalAutomation>(&mut conn)?;
        Ok(automations)
    }

    // Every attempted firing leaves exactly one audit row; rows are
    // append-only and never updated.
    pub fn insert_run(&self, run: NewTaskAutomationRun) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(task_automation_runs::table)
            .values(&run)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Daily dedup token for due-date rules: has this rule already run for
    /// this item inside the given window?
    pub fn has_run_between(&self, automation_id: &str, item_id: &str, start: i64, end: i64) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let count = task_automation_runs::table
            .filter(task_automation_runs::automation_id.eq(automation_id))
            .filter(task_automation_runs::item_id.eq(item_id))
            .filter(task_automation_runs::ran_at.ge(start))
            .filter(task_automation_runs::ran_at.lt(end))
            .count()
            .get_result::<i64>(&mut conn)?;
        Ok(count > 0)
    }

    pub fn runs_for_item(&self, item_id: &str) -> Result<Vec<TaskAutomationRun>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let runs = task_automation_runs::table
            .filter(task_automation_runs::item_id.eq(item_id))
            .order(task_automation_runs::ran_at.asc())
            .load::<TaskAutomationRun>(&mut conn)?;
        Ok(runs)
    }

    pub fn items_due_on(&self, date: &str) -> Result<Vec<TaskItem>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let items = task_items::table
            .filter(task_items::due_date.eq(date))
            .filter(task_items::archived_at.is_null())
            .load::<TaskItem>(&mut conn)?;
        Ok(items)
    }

    pub fn purge_archived_before(&self, cutoff: i64) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let purged = diesel::delete(
            task_items::table.filter(task_items::archived_at.le(cutoff)),
        )
        .execute(&mut conn)?;
        Ok(purged)
    }
}
