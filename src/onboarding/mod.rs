//! Onboarding notifier: a durable, per-user email cadence driven by
//! [`runner::OnboardingRunner`].

use crate::state::AppState;
use axum::Router;

pub mod classifier;
mod dto;
pub mod handlers;
pub mod machine;
pub mod repo;
pub mod repo_types;
pub mod runner;

pub fn router() -> Router<AppState> {
    handlers::workflow_routes()
}
