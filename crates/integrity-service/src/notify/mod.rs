//! Fan-out of a pass's change events to notification channels.
//!
//! Every sink gets the full batch once per pass, in registration order.
//! Sinks decide for themselves whether there is anything to do. A failing
//! or panicking sink is logged and the remaining sinks still run.

use crate::config::Config;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use integrity_core::ChangeEvent;
use std::sync::Arc;
use tracing::{error, info};

pub mod mail;
pub mod report;
pub mod syslog;
pub mod telegram;

pub use mail::MailSink;
pub use syslog::SyslogSink;
pub use telegram::TelegramSink;

/// Details about the scanned server that sinks include in their messages.
#[derive(Debug, Clone)]
pub struct NotifyContext {
    pub server_name: String,
    pub server_address: String,
    pub server_port: u16,
    pub detected_at: DateTime<Local>,
}

impl NotifyContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            server_name: config.server.name.clone(),
            server_address: config.server.address.clone(),
            server_port: config.server.port,
            detected_at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    Delivered,
    Skipped(String),
}

impl SinkOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_reconciliation_complete(
        &self,
        ctx: &NotifyContext,
        events: &[ChangeEvent],
    ) -> anyhow::Result<SinkOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkResult {
    Delivered,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SinkReport {
    pub sink: &'static str,
    pub result: SinkResult,
}

#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The syslog, mail and Telegram sinks, in that order.
    pub fn from_config(config: &Config) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(SyslogSink::new(&config.logging));
        dispatcher.register(MailSink::new(&config.email));
        dispatcher.register(TelegramSink::new(&config.telegram));
        dispatcher
    }

    pub fn register<S: EventSink + 'static>(&mut self, sink: S) {
        self.sinks.push(Arc::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Hands `events` to every sink and reports what each one did. Never
    /// fails: sink errors end up in the returned reports.
    pub async fn dispatch(&self, ctx: &NotifyContext, events: &[ChangeEvent]) -> Vec<SinkReport> {
        let ctx = Arc::new(ctx.clone());
        let events: Arc<[ChangeEvent]> = Arc::from(events);
        let mut reports = Vec::with_capacity(self.sinks.len());

        for sink in &self.sinks {
            let name = sink.name();
            let task = {
                let sink = Arc::clone(sink);
                let ctx = Arc::clone(&ctx);
                let events = Arc::clone(&events);
                // Own task per sink so a panic stays inside it.
                tokio::spawn(async move { sink.on_reconciliation_complete(&ctx, &events).await })
            };

            let result = match task.await {
                Ok(Ok(SinkOutcome::Delivered)) => {
                    info!(sink = name, events = events.len(), "notification sent");
                    SinkResult::Delivered
                }
                Ok(Ok(SinkOutcome::Skipped(reason))) => {
                    info!(sink = name, %reason, "notification skipped");
                    SinkResult::Skipped(reason)
                }
                Ok(Err(e)) => {
                    error!(sink = name, error = %format!("{e:#}"), "notification failed");
                    SinkResult::Failed(format!("{e:#}"))
                }
                Err(join_err) => {
                    error!(sink = name, error = %join_err, "notification sink panicked");
                    SinkResult::Failed(join_err.to_string())
                }
            };
            reports.push(SinkReport { sink: name, result });
        }
        reports
    }
}
