use diesel::prelude::*;
use diesel::result::Error as DieselError;
use crate::{
    models::user_models::{User, NewUser, ClientProfile, NewClientProfile},
    schema::{users, client_profiles},
    DbPool,
};

pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn create_user(&self, new_user: NewUser) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn find_by_id(&self, user_id: &str) -> Result<Option<User>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let user = users::table
            .find(user_id)
            .first::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    // Admins ordered by creation, so "first admin" is deterministic
    pub fn get_admins(&self) -> Result<Vec<User>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let admins = users::table
            .filter(users::role.eq_any(vec!["superadmin", "admin"]))
            .order(users::created_at.asc())
            .load::<User>(&mut conn)?;
        Ok(admins)
    }

    pub fn create_profile(&self, profile: NewClientProfile) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(client_profiles::table)
            .values(&profile)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ClientProfile>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let profile = client_profiles::table
            .filter(client_profiles::user_id.eq(user_id))
            .first::<ClientProfile>(&mut conn)
            .optional()?;
        Ok(profile)
    }

    // Profiles that can actually talk to the call provider
    pub fn get_profiles_with_credentials(&self) -> Result<Vec<ClientProfile>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let profiles = client_profiles::table
            .filter(client_profiles::ctm_account_id.is_not_null())
            .filter(client_profiles::ctm_api_key.is_not_null())
            .filter(client_profiles::ctm_api_secret.is_not_null())
            .load::<ClientProfile>(&mut conn)?;
        Ok(profiles)
    }

    // Sync cursor: max started_at observed in the last successful pass
    pub fn update_last_synced_at(&self, user_id: &str, cursor: i64) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(client_profiles::table.filter(client_profiles::user_id.eq(user_id)))
            .set(client_profiles::last_synced_at.eq(cursor))
            .execute(&mut conn)?;
        Ok(())
    }
}
