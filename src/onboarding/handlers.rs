use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{RunDetails, TriggerRequest, TriggerResponse},
    machine::OnboardingContext,
    runner,
};
use crate::{
    error::ApiError,
    state::AppState,
    validation::{is_valid_email, ValidationErrors},
};

pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows/onboarding", post(trigger_onboarding))
        .route("/workflows/onboarding/:id", get(get_run))
}

/// Starts an onboarding run. Returns 202 with the run id.
#[instrument(skip(state, headers, payload))]
pub async fn trigger_onboarding(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    check_trigger_token(&state, &headers)?;

    let ctx = OnboardingContext {
        email: payload.email.trim().to_lowercase(),
        full_name: payload.full_name.trim().to_string(),
    };
    let mut errs = ValidationErrors::default();
    if !is_valid_email(&ctx.email) {
        errs.push("email", "Invalid email");
    }
    if ctx.full_name.is_empty() {
        errs.push("fullName", "Required");
    }
    if !errs.is_empty() {
        return Err(errs.into());
    }

    let id = runner::trigger(state.workflows.as_ref(), &ctx, OffsetDateTime::now_utc()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse { workflow_run_id: id }),
    ))
}

#[instrument(skip(state, headers))]
pub async fn get_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<RunDetails>, ApiError> {
    check_trigger_token(&state, &headers)?;

    let run = state
        .workflows
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow run not found".into()))?;
    let steps = state.workflows.steps(id).await?;
    Ok(Json(RunDetails { run, steps }))
}

fn check_trigger_token(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.onboarding.trigger_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        warn!("workflow request without a valid trigger token");
        return Err(ApiError::Unauthorized("Invalid workflow token".into()));
    }
    Ok(())
}
