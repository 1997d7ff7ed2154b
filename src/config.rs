use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Credentials for the QStash queue and the Resend provider behind it.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub qstash_url: String,
    pub qstash_token: String,
    pub resend_token: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingConfig {
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    pub lease_secs: i64,
    pub retry_delay_secs: i64,
    pub max_attempts: i32,
    pub trigger_token: Option<String>,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            batch_size: 16,
            lease_secs: 300,
            retry_delay_secs: 60,
            max_attempts: 5,
            trigger_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub email: EmailConfig,
    pub onboarding: OnboardingConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "bookwise".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "bookwise-users".into()),
            ttl_minutes: parsed("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: parsed("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let email = EmailConfig {
            qstash_url: std::env::var("QSTASH_URL")
                .unwrap_or_else(|_| "https://qstash.upstash.io".into()),
            qstash_token: required("QSTASH_TOKEN")?,
            resend_token: required("RESEND_TOKEN")?,
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "BookWise <onboarding@resend.dev>".into()),
        };

        let defaults = OnboardingConfig::default();
        let onboarding = OnboardingConfig {
            poll_interval_secs: parsed("ONBOARDING_POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            batch_size: parsed("ONBOARDING_BATCH_SIZE", defaults.batch_size),
            lease_secs: parsed("ONBOARDING_LEASE_SECS", defaults.lease_secs),
            retry_delay_secs: parsed("ONBOARDING_RETRY_DELAY_SECS", defaults.retry_delay_secs),
            max_attempts: parsed("ONBOARDING_MAX_ATTEMPTS", defaults.max_attempts),
            trigger_token: std::env::var("WORKFLOW_TRIGGER_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
        };

        Ok(Self {
            database_url,
            jwt,
            email,
            onboarding,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("missing environment variable {key}"))
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
