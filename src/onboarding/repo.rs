use anyhow::Context;
use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::machine::{Checkpoint, OnboardingContext};
use super::repo_types::{RunStatus, StepRecord, StepRecordRow, WorkflowRun, WorkflowRunRow};

/// Durable storage for onboarding runs.
///
/// A run is claimed with a lease before any of its steps execute, which keeps
/// two runners from working the same run at once.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create(
        &self,
        ctx: &OnboardingContext,
        checkpoint: Checkpoint,
        wake_at: OffsetDateTime,
    ) -> anyhow::Result<WorkflowRun>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<WorkflowRun>>;

    async fn steps(&self, id: Uuid) -> anyhow::Result<Vec<StepRecord>>;

    /// Lease up to `limit` running runs that are due at `now`.
    async fn claim_due(
        &self,
        now: OffsetDateTime,
        limit: i64,
        lease: Duration,
    ) -> anyhow::Result<Vec<WorkflowRun>>;

    /// Journal `record` and move the run to `next`, atomically.
    async fn commit_step(
        &self,
        id: Uuid,
        record: &StepRecord,
        next: Checkpoint,
        wake_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    async fn fail_step(
        &self,
        id: Uuid,
        error: &str,
        retry_at: OffsetDateTime,
        status: RunStatus,
    ) -> anyhow::Result<()>;

    async fn release(&self, id: Uuid) -> anyhow::Result<()>;
}

const RUN_COLUMNS: &str =
    "id, email, full_name, stage, cycle, status, wake_at, attempts, last_error, created_at";

/// Steps of one drive share `completed_at`, so the journal is ordered by the
/// insertion sequence.
const LIST_STEPS_SQL: &str = r#"
    SELECT step_name, cycle, outcome, completed_at
      FROM onboarding_steps
     WHERE run_id = $1
     ORDER BY seq ASC
"#;

#[derive(Clone)]
pub struct PgWorkflowStore {
    db: PgPool,
}

impl PgWorkflowStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn create(
        &self,
        ctx: &OnboardingContext,
        checkpoint: Checkpoint,
        wake_at: OffsetDateTime,
    ) -> anyhow::Result<WorkflowRun> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            r#"
            INSERT INTO onboarding_runs (email, full_name, stage, cycle, wake_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(&ctx.email)
        .bind(&ctx.full_name)
        .bind(Json(checkpoint.stage))
        .bind(checkpoint.cycle as i32)
        .bind(wake_at)
        .fetch_one(&self.db)
        .await
        .context("insert onboarding run")?;
        Ok(row.into())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<WorkflowRun>> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM onboarding_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get onboarding run")?;
        Ok(row.map(Into::into))
    }

    async fn steps(&self, id: Uuid) -> anyhow::Result<Vec<StepRecord>> {
        let rows = sqlx::query_as::<_, StepRecordRow>(LIST_STEPS_SQL)
        .bind(id)
        .fetch_all(&self.db)
        .await
        .context("list onboarding steps")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn claim_due(
        &self,
        now: OffsetDateTime,
        limit: i64,
        lease: Duration,
    ) -> anyhow::Result<Vec<WorkflowRun>> {
        let rows = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            r#"
            UPDATE onboarding_runs
               SET locked_until = $3
             WHERE id IN (
                   SELECT id
                     FROM onboarding_runs
                    WHERE status = 'running'
                      AND wake_at <= $1
                      AND (locked_until IS NULL OR locked_until < $1)
                    ORDER BY wake_at ASC
                    LIMIT $2
                      FOR UPDATE SKIP LOCKED
             )
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(limit)
        .bind(now + lease)
        .fetch_all(&self.db)
        .await
        .context("claim due onboarding runs")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn commit_step(
        &self,
        id: Uuid,
        record: &StepRecord,
        next: Checkpoint,
        wake_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        sqlx::query(
            r#"
            INSERT INTO onboarding_steps (run_id, step_name, cycle, outcome, completed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id, step_name, cycle) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&record.step_name)
        .bind(record.cycle as i32)
        .bind(Json(&record.outcome))
        .bind(record.completed_at)
        .execute(&mut *tx)
        .await
        .context("insert onboarding step")?;

        sqlx::query(
            r#"
            UPDATE onboarding_runs
               SET stage = $2, cycle = $3, wake_at = $4,
                   attempts = 0, last_error = NULL, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(next.stage))
        .bind(next.cycle as i32)
        .bind(wake_at)
        .execute(&mut *tx)
        .await
        .context("advance onboarding run")?;

        tx.commit().await.context("commit tx")?;
        Ok(())
    }

    async fn fail_step(
        &self,
        id: Uuid,
        error: &str,
        retry_at: OffsetDateTime,
        status: RunStatus,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE onboarding_runs
               SET attempts = attempts + 1, last_error = $2, wake_at = $3,
                   status = $4, locked_until = NULL, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(retry_at)
        .bind(status.as_str())
        .execute(&self.db)
        .await
        .context("record onboarding failure")?;
        Ok(())
    }

    async fn release(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE onboarding_runs SET locked_until = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("release onboarding run")?;
        Ok(())
    }
}
