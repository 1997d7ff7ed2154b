use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};
use crate::onboarding::classifier::ActivityLookup;

const USER_COLUMNS: &str = "id, full_name, email, university_id, university_card, \
                            password_hash, last_activity_date, created_at";

impl User {
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    /// Insert a user. Returns `None` when the email is already taken.
    pub async fn create(db: &PgPool, new: &NewUser<'_>) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (full_name, email, university_id, university_card, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(new.full_name)
        .bind(new.email)
        .bind(new.university_id)
        .bind(new.university_card)
        .bind(new.password_hash)
        .fetch_optional(db)
        .await
        .context("insert user")?;
        Ok(user)
    }

    /// Stamp `now` as the last activity unless it was already stamped on the
    /// same UTC day.
    pub async fn touch_activity(db: &PgPool, id: Uuid, now: OffsetDateTime) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET last_activity_date = $2
             WHERE id = $1
               AND (last_activity_date IS NULL
                    OR (last_activity_date AT TIME ZONE 'UTC')::date < ($2 AT TIME ZONE 'UTC')::date)
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(db)
        .await
        .context("touch user activity")?;
        Ok(res.rows_affected() > 0)
    }
}

/// Whether a user last seen at `last` should be stamped again at `now`.
pub fn activity_is_stale(last: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    let day = |t: OffsetDateTime| t.to_offset(UtcOffset::UTC).date();
    last.map_or(true, |last| day(last) < day(now))
}

/// Activity lookups for the onboarding classifier, backed by `users`.
#[derive(Clone)]
pub struct PgActivityLookup {
    db: PgPool,
}

impl PgActivityLookup {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActivityLookup for PgActivityLookup {
    async fn last_activity(&self, email: &str) -> anyhow::Result<Option<Option<OffsetDateTime>>> {
        let row: Option<(Option<OffsetDateTime>,)> = sqlx::query_as(
            "SELECT last_activity_date FROM users WHERE email = lower($1) LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("load last activity")?;
        Ok(row.map(|(last,)| last))
    }
}
