//! User contact entity (database row mapping).

use sqlx::FromRow;
use uuid::Uuid;

/// The slice of the users table needed to deliver tickets.
#[derive(Debug, Clone, FromRow)]
pub struct UserContactEntity {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

impl From<UserContactEntity> for domain::services::Recipient {
    fn from(entity: UserContactEntity) -> Self {
        Self {
            email: entity.email,
            display_name: entity.display_name,
        }
    }
}
