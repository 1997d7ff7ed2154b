use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::{StepRecord, WorkflowRun};

/// Body of `POST /workflows/onboarding`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub workflow_run_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    #[serde(flatten)]
    pub run: WorkflowRun,
    pub steps: Vec<StepRecord>,
}
