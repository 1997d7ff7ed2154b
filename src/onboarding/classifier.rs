use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

pub const RECENT_ACTIVITY_WINDOW: Duration = Duration::days(3);
pub const DORMANCY_WINDOW: Duration = Duration::days(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserState {
    NonActive,
    Active,
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NonActive => "non-active",
            Self::Active => "active",
        })
    }
}

/// Read side of the users table needed by the classifier.
#[async_trait]
pub trait ActivityLookup: Send + Sync {
    /// `None` when no user has this email. The inner `None` is a user whose
    /// last activity was never recorded.
    async fn last_activity(&self, email: &str) -> anyhow::Result<Option<Option<OffsetDateTime>>>;
}

/// Elapsed time in `(3 days, 30 days]` is non-active; anything else,
/// including more than 30 days, is active.
pub fn classify_elapsed(elapsed: Duration) -> UserState {
    if elapsed > RECENT_ACTIVITY_WINDOW && elapsed <= DORMANCY_WINDOW {
        UserState::NonActive
    } else {
        UserState::Active
    }
}

pub fn classify(last_activity: Option<Option<OffsetDateTime>>, now: OffsetDateTime) -> UserState {
    match last_activity {
        None => UserState::NonActive,
        Some(at) => classify_elapsed(now - at.unwrap_or(OffsetDateTime::UNIX_EPOCH)),
    }
}

pub async fn user_state(
    lookup: &dyn ActivityLookup,
    email: &str,
    now: OffsetDateTime,
) -> anyhow::Result<UserState> {
    let last = lookup.last_activity(email).await?;
    Ok(classify(last, now))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeActivity {
        pub users: Mutex<HashMap<String, Option<OffsetDateTime>>>,
        pub lookups: Mutex<usize>,
        failures: Mutex<usize>,
    }

    impl FakeActivity {
        pub fn with_user(email: &str, last: Option<OffsetDateTime>) -> Self {
            let fake = Self::default();
            fake.users.lock().unwrap().insert(email.to_string(), last);
            fake
        }

        pub fn lookups(&self) -> usize {
            *self.lookups.lock().unwrap()
        }

        /// Make the next `n` lookups fail as a database error would.
        pub fn fail_next(&self, n: usize) {
            *self.failures.lock().unwrap() = n;
        }
    }

    #[async_trait]
    impl ActivityLookup for FakeActivity {
        async fn last_activity(
            &self,
            email: &str,
        ) -> anyhow::Result<Option<Option<OffsetDateTime>>> {
            *self.lookups.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("connection reset by peer");
            }
            Ok(self.users.lock().unwrap().get(email).copied())
        }
    }
}
