use diesel::prelude::*;
use diesel::result::Error as DieselError;
use crate::{
    models::user_models::{Notification, NewNotification},
    schema::notifications,
    DbPool,
};

pub struct NotificationRepository {
    pool: DbPool,
}

impl NotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn insert(&self, notification: NewNotification) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(notifications::table)
            .values(&notification)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let rows = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .order(notifications::created_at.desc())
            .load::<Notification>(&mut conn)?;
        Ok(rows)
    }
}
