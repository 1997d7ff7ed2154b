use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use super::machine::{Checkpoint, OnboardingContext, Outcome, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

/// One onboarding run and the step it is parked at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: Uuid,
    pub context: OnboardingContext,
    pub checkpoint: Checkpoint,
    pub status: RunStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub wake_at: OffsetDateTime,
    pub attempts: i32,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Journal entry for a completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_name: String,
    pub cycle: u32,
    pub outcome: Outcome,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct WorkflowRunRow {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub stage: Json<Stage>,
    pub cycle: i32,
    pub status: String,
    pub wake_at: OffsetDateTime,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct StepRecordRow {
    pub step_name: String,
    pub cycle: i32,
    pub outcome: Json<Outcome>,
    pub completed_at: OffsetDateTime,
}

impl From<WorkflowRunRow> for WorkflowRun {
    fn from(r: WorkflowRunRow) -> Self {
        Self {
            id: r.id,
            context: OnboardingContext {
                email: r.email,
                full_name: r.full_name,
            },
            checkpoint: Checkpoint {
                stage: r.stage.0,
                cycle: u32::try_from(r.cycle).unwrap_or(0),
            },
            status: if r.status == "failed" {
                RunStatus::Failed
            } else {
                RunStatus::Running
            },
            wake_at: r.wake_at,
            attempts: r.attempts,
            last_error: r.last_error,
            created_at: r.created_at,
        }
    }
}

impl From<StepRecordRow> for StepRecord {
    fn from(r: StepRecordRow) -> Self {
        Self {
            step_name: r.step_name,
            cycle: u32::try_from(r.cycle).unwrap_or(0),
            outcome: r.outcome.0,
            completed_at: r.completed_at,
        }
    }
}
