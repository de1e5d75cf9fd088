//! Telegram bot notifications.

use super::report::incident_body;
use super::{EventSink, NotifyContext, SinkOutcome};
use crate::config::TelegramConfig;
use anyhow::Context;
use async_trait::async_trait;
use integrity_core::ChangeEvent;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

pub struct TelegramSink {
    api_base: String,
    api_token: Option<String>,
    chat_id: Option<i64>,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_token: config.api_token.clone(),
            chat_id: config.chat_id,
        }
    }

    /// Points the sink at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EventSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn on_reconciliation_complete(
        &self,
        ctx: &NotifyContext,
        events: &[ChangeEvent],
    ) -> anyhow::Result<SinkOutcome> {
        if events.is_empty() {
            return Ok(SinkOutcome::skipped("no events detected"));
        }
        let (Some(token), Some(chat_id)) = (self.api_token.as_deref(), self.chat_id) else {
            return Ok(SinkOutcome::skipped("no bot token or chat id configured"));
        };

        let text = incident_body(ctx, events);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building http client")?;
        let resp = client
            .post(format!("{}/bot{token}/sendMessage", self.api_base))
            .json(&SendMessage {
                chat_id,
                text: &text,
            })
            .send()
            .await
            .context("contacting telegram")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("telegram rejected the message ({status}): {body}");
        }
        Ok(SinkOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use integrity_core::BaselineRecord;

    fn ctx() -> NotifyContext {
        NotifyContext {
            server_name: "web-01".into(),
            server_address: "203.0.113.10".into(),
            server_port: 22,
            detected_at: Local::now(),
        }
    }

    fn event() -> ChangeEvent {
        ChangeEvent::added(&BaselineRecord {
            id: 1,
            host_id: 1,
            path: "/a".into(),
            checksum: "c1".into(),
        })
    }

    #[tokio::test]
    async fn needs_token_and_chat() {
        let sink = TelegramSink::new(&TelegramConfig {
            api_token: Some("123:abc".into()),
            chat_id: None,
        });
        let outcome = sink.on_reconciliation_complete(&ctx(), &[event()]).await.unwrap();
        assert_eq!(outcome, SinkOutcome::skipped("no bot token or chat id configured"));
    }

    #[tokio::test]
    async fn nothing_to_send_without_events() {
        let sink = TelegramSink::new(&TelegramConfig {
            api_token: Some("123:abc".into()),
            chat_id: Some(42),
        });
        let outcome = sink.on_reconciliation_complete(&ctx(), &[]).await.unwrap();
        assert_eq!(outcome, SinkOutcome::skipped("no events detected"));
    }

    #[tokio::test]
    async fn unreachable_api_is_an_error() {
        // Nothing listens on the discard port.
        let sink = TelegramSink::new(&TelegramConfig {
            api_token: Some("123:abc".into()),
            chat_id: Some(42),
        })
        .with_api_base("http://127.0.0.1:9/");
        assert!(sink.on_reconciliation_complete(&ctx(), &[event()]).await.is_err());
    }
}
