use diesel::prelude::*;
use diesel::result::Error as DieselError;
use crate::{
    models::call_models::{ActiveClient, NewActiveClient},
    schema::active_clients,
    DbPool,
};

pub struct ActiveClientRepository {
    pool: DbPool,
}

impl ActiveClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn create(&self, client: NewActiveClient) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(active_clients::table)
            .values(&client)
            .execute(&mut conn)?;
        Ok(())
    }

    // Archive-aware: rows archived at or before `now` are excluded. Phone
    // matching happens in the caller because stored numbers vary in format.
    pub fn list_active_for_owner(&self, owner_user_id: &str, now: i64) -> Result<Vec<ActiveClient>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let clients = active_clients::table
            .filter(active_clients::owner_user_id.eq(owner_user_id))
            .filter(
                active_clients::archived_at
                    .is_null()
                    .or(active_clients::archived_at.gt(now)),
            )
            .load::<ActiveClient>(&mut conn)?;
        Ok(clients)
    }
}
