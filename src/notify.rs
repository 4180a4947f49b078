//! Outbound delivery of composed summaries.
//!
//! Transports implement [`Notifier`]. Delivery is best-effort: a failure for
//! one recipient is logged and counted, never propagated to the caller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::error::{ChoreError, Result};
use crate::summary::SummaryMessage;

/// Notification transport contract.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Stable transport identifier (e.g. `log`, `webhook`).
    fn id(&self) -> &'static str;

    /// Deliver one message.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Writes every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn id(&self) -> &'static str {
        "log"
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        info!(to, subject, "summary\n{body}");
        Ok(())
    }
}

/// POSTs `{to, subject, body}` as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChoreError::Notification(format!("cannot build http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            bearer_token,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn id(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let payload = json!({
            "to": to,
            "subject": subject,
            "body": body,
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChoreError::Notification(format!("webhook request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ChoreError::Notification(format!(
                "webhook returned {status}: {text}"
            )));
        }
        Ok(())
    }
}

/// Keeps every delivered message in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SummaryMessage>>,
    failing_for: Vec<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that rejects messages addressed to any of `addresses`.
    pub fn failing_for(addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sent: Mutex::default(),
            failing_for: addresses.into_iter().map(Into::into).collect(),
        }
    }

    /// Messages delivered so far, in send order.
    pub fn sent(&self) -> Vec<SummaryMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn id(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        if self.failing_for.iter().any(|a| a == to) {
            return Err(ChoreError::Notification(format!("rejected recipient {to}")));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SummaryMessage {
                to: to.to_owned(),
                subject: subject.to_owned(),
                body: body.to_owned(),
            });
        Ok(())
    }
}

/// Build the transport described by `config`.
pub fn from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    Ok(match config {
        NotifierConfig::Log => Arc::new(LogNotifier),
        NotifierConfig::Webhook {
            url,
            bearer_token,
            timeout_secs,
        } => Arc::new(WebhookNotifier::new(
            url.clone(),
            bearer_token.clone(),
            Duration::from_secs(*timeout_secs),
        )?),
    })
}

/// Counts from one [`dispatch_all`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Send every message, logging and counting failures instead of stopping.
/// Messages without a recipient address are skipped.
pub async fn dispatch_all(notifier: &dyn Notifier, messages: &[SummaryMessage]) -> DispatchReport {
    let mut report = DispatchReport::default();
    for message in messages {
        if message.to.trim().is_empty() {
            warn!(subject = %message.subject, "summary has no recipient address, skipping");
            report.skipped += 1;
            continue;
        }
        match notifier
            .send(&message.to, &message.subject, &message.body)
            .await
        {
            Ok(()) => report.sent += 1,
            Err(e) => {
                warn!(to = %message.to, notifier = notifier.id(), "summary delivery failed: {e}");
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message(to: &str) -> SummaryMessage {
        SummaryMessage {
            to: to.to_owned(),
            subject: "Daily Chore Summary".to_owned(),
            body: "Hello".to_owned(),
        }
    }

    #[tokio::test]
    async fn dispatch_continues_past_failures() {
        let notifier = RecordingNotifier::failing_for(["bad@example.org"]);
        let messages = vec![
            message("a@example.org"),
            message("bad@example.org"),
            message(""),
            message("b@example.org"),
        ];
        let report = dispatch_all(&notifier, &messages).await;
        assert_eq!(
            report,
            DispatchReport {
                sent: 2,
                failed: 1,
                skipped: 1
            }
        );
        let sent: Vec<_> = notifier.sent().into_iter().map(|m| m.to).collect();
        assert_eq!(sent, vec!["a@example.org", "b@example.org"]);
    }

    #[tokio::test]
    async fn webhook_posts_json_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mail"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_partial_json(serde_json::json!({
                "to": "max@example.org",
                "subject": "Weekly Chore Summary",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(
            format!("{}/mail", server.uri()),
            Some("s3cret".to_owned()),
            Duration::from_secs(5),
        )
        .unwrap();
        notifier
            .send("max@example.org", "Weekly Chore Summary", "body")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn webhook_non_success_is_notification_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("relay down"))
            .mount(&server)
            .await;

        let notifier =
            WebhookNotifier::new(server.uri(), None, Duration::from_secs(5)).unwrap();
        let err = notifier.send("x@example.org", "s", "b").await.unwrap_err();
        match err {
            ChoreError::Notification(msg) => assert!(msg.contains("500")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn from_config_picks_transport() {
        assert_eq!(from_config(&NotifierConfig::Log).unwrap().id(), "log");
        let webhook = NotifierConfig::Webhook {
            url: "http://127.0.0.1:1/hook".to_owned(),
            bearer_token: None,
            timeout_secs: 1,
        };
        assert_eq!(from_config(&webhook).unwrap().id(), "webhook");
    }
}
