use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub university_id: i64,
    pub university_card: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string
    pub last_activity_date: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Validated sign-up data ready to insert.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub full_name: &'a str,
    pub email: &'a str,
    pub university_id: i64,
    pub university_card: &'a str,
    pub password_hash: &'a str,
}
