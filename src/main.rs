use std::sync::Arc;

use tokio::sync::watch;

mod app;
mod auth;
mod config;
mod email;
mod error;
mod onboarding;
mod state;
mod validation;

use crate::auth::repo::PgActivityLookup;
use crate::onboarding::runner::OnboardingRunner;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "bookwise=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let state = AppState::init().await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&state.db).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = OnboardingRunner::new(
        state.workflows.clone(),
        Arc::new(PgActivityLookup::new(state.db.clone())),
        state.mailer.clone(),
        state.config.onboarding.clone(),
    );
    let runner_task = tokio::spawn(runner.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    app::serve(app::build_app(state), shutdown_rx).await?;
    runner_task.await?;
    Ok(())
}
