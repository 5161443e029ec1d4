use diesel::prelude::*;
use diesel::result::Error as DieselError;
use crate::{
    models::call_models::{CallLog, NewCallLog},
    schema::call_logs,
    DbPool,
};

pub struct CallLogRepository {
    pool: DbPool,
}

impl CallLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn find_by_provider_id(&self, user_id: &str, call_id: &str) -> Result<Option<CallLog>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let log = call_logs::table
            .filter(call_logs::user_id.eq(user_id))
            .filter(call_logs::call_id.eq(call_id))
            .first::<CallLog>(&mut conn)
            .optional()?;
        Ok(log)
    }

    // Upsert on (user_id, call_id); the row id is kept stable across syncs
    pub fn upsert(&self, new_log: NewCallLog) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(call_logs::table)
            .values(&new_log)
            .on_conflict((call_logs::user_id, call_logs::call_id))
            .do_update()
            .set((
                call_logs::direction.eq(&new_log.direction),
                call_logs::from_number.eq(&new_log.from_number),
                call_logs::to_number.eq(&new_log.to_number),
                call_logs::started_at.eq(new_log.started_at),
                call_logs::duration_sec.eq(new_log.duration_sec),
                call_logs::score.eq(new_log.score),
                call_logs::meta.eq(&new_log.meta),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn update_score_and_meta(&self, user_id: &str, call_id: &str, score: i32, meta: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            call_logs::table
                .filter(call_logs::user_id.eq(user_id))
                .filter(call_logs::call_id.eq(call_id)),
        )
        .set((call_logs::score.eq(score), call_logs::meta.eq(meta)))
        .execute(&mut conn)?;
        Ok(())
    }

    // Prior calls from the same normalized number, excluding the call itself
    pub fn count_prior_calls(&self, user_id: &str, from_number: &str, exclude_call_id: &str) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let count = call_logs::table
            .filter(call_logs::user_id.eq(user_id))
            .filter(call_logs::from_number.eq(from_number))
            .filter(call_logs::call_id.ne(exclude_call_id))
            .count()
            .get_result::<i64>(&mut conn)?;
        Ok(count)
    }

    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<CallLog>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let logs = call_logs::table
            .filter(call_logs::user_id.eq(user_id))
            .order(call_logs::started_at.desc())
            .load::<CallLog>(&mut conn)?;
        Ok(logs)
    }

    pub fn delete_all_for_user(&self, user_id: &str) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let deleted = diesel::delete(call_logs::table.filter(call_logs::user_id.eq(user_id)))
            .execute(&mut conn)?;
        Ok(deleted)
    }
}
