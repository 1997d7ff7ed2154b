//! Outbound email: one message is published to the QStash queue, which
//! forwards it to Resend. We return once QStash has accepted the message.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::EmailConfig;

const RESEND_EMAILS_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("queue request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("queue rejected message with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Anything that can hand an email off for delivery.
///
/// `idempotency_key` is stable across retries of the same step so the queue
/// can drop duplicates.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        message: &EmailMessage,
        idempotency_key: &str,
    ) -> Result<Option<String>, DispatchError>;
}

/// Payload Resend expects, forwarded verbatim by QStash.
#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: Option<String>,
}

#[derive(Clone)]
pub struct QstashMailer {
    client: reqwest::Client,
    publish_url: String,
    qstash_token: String,
    resend_token: String,
    from_address: String,
}

impl QstashMailer {
    pub fn new(client: reqwest::Client, config: &EmailConfig) -> Self {
        Self {
            client,
            publish_url: publish_url(&config.qstash_url),
            qstash_token: config.qstash_token.clone(),
            resend_token: config.resend_token.clone(),
            from_address: config.from_address.clone(),
        }
    }
}

fn publish_url(base: &str) -> String {
    format!("{}/v2/publish/{}", base.trim_end_matches('/'), RESEND_EMAILS_URL)
}

#[async_trait]
impl Mailer for QstashMailer {
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn send(
        &self,
        message: &EmailMessage,
        idempotency_key: &str,
    ) -> Result<Option<String>, DispatchError> {
        let body = ResendEmail {
            from: &self.from_address,
            to: [message.email.as_str()],
            subject: &message.subject,
            html: &message.message,
        };

        let res = self
            .client
            .post(&self.publish_url)
            .bearer_auth(&self.qstash_token)
            .header(
                "Upstash-Forward-Authorization",
                format!("Bearer {}", self.resend_token),
            )
            .header("Upstash-Deduplication-Id", idempotency_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { status, body });
        }

        let message_id = res
            .json::<PublishResponse>()
            .await
            .ok()
            .and_then(|r| r.message_id);
        debug!(?message_id, "email enqueued");
        Ok(message_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every send; optionally fails the next `n` sends.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<(EmailMessage, String)>>,
        pub fail_next: Mutex<usize>,
    }

    impl RecordingMailer {
        pub fn sent(&self) -> Vec<(EmailMessage, String)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn fail_next(&self, n: usize) {
            *self.fail_next.lock().unwrap() = n;
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(
            &self,
            message: &EmailMessage,
            idempotency_key: &str,
        ) -> Result<Option<String>, DispatchError> {
            {
                let mut fail = self.fail_next.lock().unwrap();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(DispatchError::Rejected {
                        status: StatusCode::SERVICE_UNAVAILABLE,
                        body: "queue unavailable".into(),
                    });
                }
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((message.clone(), idempotency_key.to_string()));
            Ok(Some(format!("msg_{}", sent.len())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_url_targets_resend_through_qstash() {
        assert_eq!(
            publish_url("https://qstash.upstash.io/"),
            "https://qstash.upstash.io/v2/publish/https://api.resend.com/emails"
        );
    }

    #[test]
    fn resend_payload_shape() {
        let body = ResendEmail {
            from: "BookWise <onboarding@resend.dev>",
            to: ["a@b.com"],
            subject: "Welcome to BookWise",
            html: "Hi Alice, welcome to BookWise!",
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["to"], serde_json::json!(["a@b.com"]));
        assert_eq!(v["html"], "Hi Alice, welcome to BookWise!");
        assert_eq!(v["from"], "BookWise <onboarding@resend.dev>");
    }

    #[test]
    fn publish_response_tolerates_missing_id() {
        let r: PublishResponse = serde_json::from_str(r#"{"messageId":"msg_1"}"#).unwrap();
        assert_eq!(r.message_id.as_deref(), Some("msg_1"));
        let r: PublishResponse = serde_json::from_str("{}").unwrap();
        assert!(r.message_id.is_none());
    }
}
