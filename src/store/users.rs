use serde::Serialize;
use sqlx::PgPool;

use super::StoreError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub full_name: String,
}

#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a user by id. Ids below 1 short-circuit to `RecordNotFound`
    /// without touching the database.
    pub async fn get(&self, id: i64) -> Result<User, StoreError> {
        if id < 1 {
            return Err(StoreError::RecordNotFound);
        }

        sqlx::query_as("SELECT id, full_name FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RecordNotFound)
    }
}
