//! The onboarding sequence as a pure state machine.
//!
//! A [`Checkpoint`] names the step that has to run next. [`Checkpoint::step`]
//! yields that step's side effect; once the effect has been carried out,
//! [`Checkpoint::advance`] folds its [`Outcome`] into the next checkpoint.
//! Nothing here performs I/O, so the runner can persist a checkpoint, crash,
//! and pick up at exactly the same step later.
//!
//! ```text
//! welcome -> first_wait -> check_state -> notify(state) -> follow_up_wait
//!                               ^                                 |
//!                               +---------------------------------+
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Duration;
use uuid::Uuid;

use super::classifier::UserState;
use crate::email::EmailMessage;

pub const FIRST_WAIT: Duration = Duration::days(3);
pub const FOLLOW_UP_WAIT: Duration = Duration::days(30);

pub const WELCOME_STEP: &str = "new-signup";
pub const FIRST_WAIT_STEP: &str = "wait-for-3-days";
pub const CHECK_STATE_STEP: &str = "check-user-state";
pub const NON_ACTIVE_EMAIL_STEP: &str = "send-email-non-active";
pub const ACTIVE_EMAIL_STEP: &str = "send-email-active";
pub const FOLLOW_UP_WAIT_STEP: &str = "wait-for-1-month";

/// Payload a run is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingContext {
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "state", rename_all = "snake_case")]
pub enum Stage {
    Welcome,
    FirstWait,
    CheckState,
    Notify(UserState),
    FollowUpWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: Stage,
    /// Passes through the check/notify/wait loop, 0 before the first check.
    pub cycle: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendEmail(EmailMessage),
    CheckUserState { email: String },
    Sleep(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub cycle: u32,
    pub effect: Effect,
}

impl Step {
    /// Stable across retries of this step within one run.
    pub fn idempotency_key(&self, run_id: Uuid) -> String {
        format!("{run_id}-{}-{}", self.name, self.cycle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Sent { message_id: Option<String> },
    Classified { state: UserState },
    Slept { seconds: i64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("outcome {outcome:?} does not complete stage {stage:?}")]
pub struct TransitionError {
    pub stage: Stage,
    pub outcome: Outcome,
}

impl Checkpoint {
    pub const fn start() -> Self {
        Self {
            stage: Stage::Welcome,
            cycle: 0,
        }
    }

    pub fn step(&self, ctx: &OnboardingContext) -> Step {
        let (name, effect) = match self.stage {
            Stage::Welcome => (WELCOME_STEP, Effect::SendEmail(welcome_email(ctx))),
            Stage::FirstWait => (FIRST_WAIT_STEP, Effect::Sleep(FIRST_WAIT)),
            Stage::CheckState => (
                CHECK_STATE_STEP,
                Effect::CheckUserState {
                    email: ctx.email.clone(),
                },
            ),
            Stage::Notify(UserState::NonActive) => (
                NON_ACTIVE_EMAIL_STEP,
                Effect::SendEmail(non_active_email(ctx)),
            ),
            Stage::Notify(UserState::Active) => {
                (ACTIVE_EMAIL_STEP, Effect::SendEmail(active_email(ctx)))
            }
            Stage::FollowUpWait => (FOLLOW_UP_WAIT_STEP, Effect::Sleep(FOLLOW_UP_WAIT)),
        };
        Step {
            name,
            cycle: self.cycle,
            effect,
        }
    }

    pub fn advance(self, outcome: &Outcome) -> Result<Self, TransitionError> {
        let next = match (self.stage, outcome) {
            (Stage::Welcome, Outcome::Sent { .. }) => Self {
                stage: Stage::FirstWait,
                ..self
            },
            (Stage::FirstWait | Stage::FollowUpWait, Outcome::Slept { .. }) => Self {
                stage: Stage::CheckState,
                cycle: self.cycle + 1,
            },
            (Stage::CheckState, Outcome::Classified { state }) => Self {
                stage: Stage::Notify(*state),
                ..self
            },
            (Stage::Notify(_), Outcome::Sent { .. }) => Self {
                stage: Stage::FollowUpWait,
                ..self
            },
            (stage, outcome) => {
                return Err(TransitionError {
                    stage,
                    outcome: outcome.clone(),
                })
            }
        };
        Ok(next)
    }
}

fn welcome_email(ctx: &OnboardingContext) -> EmailMessage {
    EmailMessage {
        email: ctx.email.clone(),
        subject: "Welcome to BookWise".into(),
        message: format!("Hi {}, welcome to BookWise!", ctx.full_name),
    }
}

fn non_active_email(ctx: &OnboardingContext) -> EmailMessage {
    EmailMessage {
        email: ctx.email.clone(),
        subject: "Are you still there?".into(),
        message: format!(
            "Hi {}, we noticed you haven't been active for a while. We miss you at BookWise!",
            ctx.full_name
        ),
    }
}

fn active_email(ctx: &OnboardingContext) -> EmailMessage {
    EmailMessage {
        email: ctx.email.clone(),
        subject: "Welcome back!".into(),
        message: format!(
            "Hi {}, welcome back to BookWise! We hope you enjoy your time here.",
            ctx.full_name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> OnboardingContext {
        OnboardingContext {
            email: "a@b.com".into(),
            full_name: "Alice".into(),
        }
    }

    fn sent() -> Outcome {
        Outcome::Sent { message_id: None }
    }

    fn slept() -> Outcome {
        Outcome::Slept { seconds: 0 }
    }

    #[test]
    fn starts_with_welcome_email() {
        let step = Checkpoint::start().step(&alice());
        assert_eq!(step.name, "new-signup");
        assert_eq!(step.cycle, 0);
        match step.effect {
            Effect::SendEmail(msg) => {
                assert_eq!(msg.email, "a@b.com");
                assert_eq!(msg.subject, "Welcome to BookWise");
                assert_eq!(msg.message, "Hi Alice, welcome to BookWise!");
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn walks_the_full_sequence() {
        let ctx = alice();
        let cp = Checkpoint::start().advance(&sent()).unwrap();
        assert_eq!(cp.stage, Stage::FirstWait);
        assert_eq!(cp.step(&ctx).effect, Effect::Sleep(Duration::days(3)));
        assert_eq!(cp.step(&ctx).name, "wait-for-3-days");

        let cp = cp.advance(&slept()).unwrap();
        assert_eq!(cp, Checkpoint { stage: Stage::CheckState, cycle: 1 });
        assert_eq!(
            cp.step(&ctx).effect,
            Effect::CheckUserState { email: "a@b.com".into() }
        );

        let cp = cp
            .advance(&Outcome::Classified { state: UserState::NonActive })
            .unwrap();
        let step = cp.step(&ctx);
        assert_eq!(step.name, "send-email-non-active");
        match step.effect {
            Effect::SendEmail(msg) => assert_eq!(msg.subject, "Are you still there?"),
            other => panic!("unexpected effect {other:?}"),
        }

        let cp = cp.advance(&sent()).unwrap();
        assert_eq!(cp.stage, Stage::FollowUpWait);
        let step = cp.step(&ctx);
        assert_eq!(step.name, "wait-for-1-month");
        assert_eq!(step.effect, Effect::Sleep(Duration::days(30)));

        let cp = cp.advance(&slept()).unwrap();
        assert_eq!(cp, Checkpoint { stage: Stage::CheckState, cycle: 2 });
    }

    #[test]
    fn active_users_get_welcome_back() {
        let cp = Checkpoint { stage: Stage::CheckState, cycle: 4 }
            .advance(&Outcome::Classified { state: UserState::Active })
            .unwrap();
        let step = cp.step(&alice());
        assert_eq!(step.name, "send-email-active");
        assert_eq!(step.cycle, 4);
        match step.effect {
            Effect::SendEmail(msg) => {
                assert_eq!(msg.subject, "Welcome back!");
                assert_eq!(
                    msg.message,
                    "Hi Alice, welcome back to BookWise! We hope you enjoy your time here."
                );
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn mismatched_outcome_is_rejected() {
        let err = Checkpoint::start().advance(&slept()).unwrap_err();
        assert_eq!(err.stage, Stage::Welcome);

        let cp = Checkpoint { stage: Stage::CheckState, cycle: 1 };
        assert!(cp.advance(&sent()).is_err());
    }

    #[test]
    fn idempotency_key_changes_per_cycle() {
        let run = Uuid::nil();
        let ctx = alice();
        let a = Checkpoint { stage: Stage::CheckState, cycle: 1 }.step(&ctx);
        let b = Checkpoint { stage: Stage::CheckState, cycle: 2 }.step(&ctx);
        assert_ne!(a.idempotency_key(run), b.idempotency_key(run));
        assert_eq!(
            a.idempotency_key(run),
            "00000000-0000-0000-0000-000000000000-check-user-state-1"
        );
    }

    #[test]
    fn stage_json_shape() {
        let v = serde_json::to_value(Stage::Notify(UserState::NonActive)).unwrap();
        assert_eq!(v, serde_json::json!({ "stage": "notify", "state": "non-active" }));
        let v = serde_json::to_value(Stage::FollowUpWait).unwrap();
        assert_eq!(v, serde_json::json!({ "stage": "follow_up_wait" }));
    }

    #[test]
    fn context_uses_camel_case() {
        let ctx: OnboardingContext =
            serde_json::from_str(r#"{"email":"a@b.com","fullName":"Alice"}"#).unwrap();
        assert_eq!(ctx, alice());
    }
}
