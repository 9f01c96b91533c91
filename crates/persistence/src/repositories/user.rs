//! User repository for contact lookups.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::UserContactEntity;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find an active user's email and display name.
    pub async fn find_contact(&self, id: Uuid) -> Result<Option<UserContactEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_user_contact");
        let result = sqlx::query_as::<_, UserContactEntity>(
            r#"
            SELECT id, email, display_name
            FROM users
            WHERE id = $1 AND is_active = true
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }
}
