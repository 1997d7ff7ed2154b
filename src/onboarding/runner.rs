use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::classifier::{self, ActivityLookup};
use super::machine::{Checkpoint, Effect, OnboardingContext, Outcome};
use super::repo::WorkflowStore;
use super::repo_types::{RunStatus, StepRecord, WorkflowRun};
use crate::config::OnboardingConfig;
use crate::email::Mailer;

/// Steps executed for one run per claim. The loop always reaches a sleep
/// within three steps, so this only guards against a broken machine.
const MAX_STEPS_PER_CLAIM: usize = 8;
const MAX_BACKOFF_FACTOR: i32 = 64;

/// Create a run for `ctx` that is due immediately.
pub async fn trigger(
    store: &dyn WorkflowStore,
    ctx: &OnboardingContext,
    now: OffsetDateTime,
) -> anyhow::Result<Uuid> {
    let run = store.create(ctx, Checkpoint::start(), now).await?;
    info!(run_id = %run.id, email = %ctx.email, "onboarding started");
    Ok(run.id)
}

pub struct OnboardingRunner {
    store: Arc<dyn WorkflowStore>,
    activity: Arc<dyn ActivityLookup>,
    mailer: Arc<dyn Mailer>,
    config: OnboardingConfig,
}

impl OnboardingRunner {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        activity: Arc<dyn ActivityLookup>,
        mailer: Arc<dyn Mailer>,
        config: OnboardingConfig,
    ) -> Self {
        Self {
            store,
            activity,
            mailer,
            config,
        }
    }

    /// Poll for due runs until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(?period, "onboarding runner started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(OffsetDateTime::now_utc()).await {
                        error!(error = %format!("{e:#}"), "onboarding tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("onboarding runner stopped");
    }

    /// Claim the runs due at `now` and push each of them forward. Returns how
    /// many runs were claimed.
    pub async fn tick(&self, now: OffsetDateTime) -> anyhow::Result<usize> {
        let lease = Duration::seconds(self.config.lease_secs);
        let runs = self
            .store
            .claim_due(now, self.config.batch_size, lease)
            .await?;
        let claimed = runs.len();
        if claimed > 0 {
            debug!(claimed, "claimed onboarding runs");
        }

        for run in runs {
            let id = run.id;
            if let Err(e) = self.drive(run, now).await {
                error!(run_id = %id, error = %format!("{e:#}"), "onboarding run stalled");
            }
        }
        Ok(claimed)
    }

    /// Execute steps of a claimed run until it sleeps or a step fails.
    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn drive(&self, mut run: WorkflowRun, now: OffsetDateTime) -> anyhow::Result<()> {
        for _ in 0..MAX_STEPS_PER_CLAIM {
            if run.wake_at > now {
                break;
            }

            let step = run.checkpoint.step(&run.context);
            let outcome = match self.perform(run.id, &step.effect, &step.idempotency_key(run.id), now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = format!("{e:#}");
                    return self.record_failure(&run, step.name, &message, now).await;
                }
            };

            let next = match run.checkpoint.advance(&outcome) {
                Ok(next) => next,
                Err(e) => {
                    return self.record_failure(&run, step.name, &e.to_string(), now).await;
                }
            };
            let wake_at = match &step.effect {
                Effect::Sleep(d) => now + *d,
                _ => now,
            };
            let record = StepRecord {
                step_name: step.name.to_string(),
                cycle: step.cycle,
                outcome,
                completed_at: now,
            };
            self.store.commit_step(run.id, &record, next, wake_at).await?;
            info!(step = step.name, cycle = step.cycle, outcome = ?record.outcome, "onboarding step completed");

            run.checkpoint = next;
            run.wake_at = wake_at;
            run.attempts = 0;
        }

        self.store.release(run.id).await
    }

    async fn perform(
        &self,
        run_id: Uuid,
        effect: &Effect,
        key: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Outcome> {
        let outcome = match effect {
            Effect::SendEmail(message) => {
                let message_id = self.mailer.send(message, key).await?;
                Outcome::Sent { message_id }
            }
            Effect::CheckUserState { email } => {
                let state = classifier::user_state(self.activity.as_ref(), email, now).await?;
                debug!(%run_id, %state, "user state checked");
                Outcome::Classified { state }
            }
            Effect::Sleep(d) => Outcome::Slept {
                seconds: d.whole_seconds(),
            },
        };
        Ok(outcome)
    }

    async fn record_failure(
        &self,
        run: &WorkflowRun,
        step: &str,
        message: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let attempts = run.attempts + 1;
        let status = if attempts >= self.config.max_attempts {
            RunStatus::Failed
        } else {
            RunStatus::Running
        };
        let retry_at = now + self.backoff(attempts);

        match status {
            RunStatus::Failed => {
                error!(step, attempts, error = message, "onboarding step failed permanently")
            }
            RunStatus::Running => {
                warn!(step, attempts, %retry_at, error = message, "onboarding step failed; retrying")
            }
        }
        self.store.fail_step(run.id, message, retry_at, status).await
    }

    fn backoff(&self, attempts: i32) -> Duration {
        let factor = 2_i32
            .checked_pow(attempts.saturating_sub(1).max(0) as u32)
            .unwrap_or(MAX_BACKOFF_FACTOR)
            .min(MAX_BACKOFF_FACTOR);
        Duration::seconds(self.config.retry_delay_secs) * factor
    }
}
