//! SMTP incident mail.

use super::report::{incident_body, incident_subject};
use super::{EventSink, NotifyContext, SinkOutcome};
use crate::config::EmailConfig;
use anyhow::Context;
use async_trait::async_trait;
use integrity_core::ChangeEvent;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, SmtpTransport, Transport};

const SENDER_NAME: &str = "Remote Integrity Monitor";

pub struct MailSink {
    config: EmailConfig,
}

impl MailSink {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn skip_reason(&self, events: &[ChangeEvent]) -> Option<&'static str> {
        if events.is_empty() {
            Some("no events detected")
        } else if self.config.recipients.is_empty() {
            Some("no recipients configured")
        } else if self.config.smtp_host.is_none() {
            Some("no smtp host configured")
        } else if self.config.noreply_address.is_none() {
            Some("no sender address configured")
        } else {
            None
        }
    }

    fn build_message(&self, ctx: &NotifyContext, events: &[ChangeEvent]) -> anyhow::Result<Message> {
        let sender = self
            .config
            .noreply_address
            .as_deref()
            .context("no sender address configured")?;
        let sender: Address = sender
            .parse()
            .with_context(|| format!("invalid sender address '{sender}'"))?;

        let mut builder = Message::builder()
            .from(Mailbox::new(Some(SENDER_NAME.to_string()), sender))
            .subject(incident_subject(events.len()))
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.config.recipients {
            let mailbox: Mailbox = recipient
                .parse()
                .with_context(|| format!("invalid recipient address '{recipient}'"))?;
            builder = builder.to(mailbox);
        }
        builder
            .body(incident_body(ctx, events))
            .context("building incident mail")
    }

    fn transport(&self) -> anyhow::Result<SmtpTransport> {
        let host = self
            .config
            .smtp_host
            .as_deref()
            .context("no smtp host configured")?;

        let mut builder = if self.config.starttls {
            SmtpTransport::starttls_relay(host)
                .with_context(|| format!("setting up STARTTLS relay {host}"))?
        } else {
            SmtpTransport::builder_dangerous(host)
        };
        if let Some(port) = self.config.smtp_port {
            builder = builder.port(port);
        }
        if let Some((user, pass)) = self.config.smtp_login() {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl EventSink for MailSink {
    fn name(&self) -> &'static str {
        "mail"
    }

    async fn on_reconciliation_complete(
        &self,
        ctx: &NotifyContext,
        events: &[ChangeEvent],
    ) -> anyhow::Result<SinkOutcome> {
        if let Some(reason) = self.skip_reason(events) {
            return Ok(SinkOutcome::skipped(reason));
        }

        let message = self.build_message(ctx, events)?;
        let transport = self.transport()?;
        // The SMTP transport blocks.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .context("mail task aborted")?
            .context("sending incident mail")?;
        Ok(SinkOutcome::Delivered)
    }
}
