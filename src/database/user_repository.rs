use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use crate::database::error::StoreResult;
use crate::database::repository::{User, UserDirectory};

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: i64,
    email: String,
    full_name: String,
}

/// Read-only access to registered buyers
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, full_name FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| User {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
        }))
    }
}
