//! Remote syslog (RFC 3164 over UDP).

use super::{EventSink, NotifyContext, SinkOutcome};
use crate::config::LoggingConfig;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use integrity_core::ChangeEvent;
use tokio::net::UdpSocket;

/// facility `user` (1), severity `warning` (4)
const PRIORITY: u8 = 12;
const TAG: &str = "remote-integrity";

pub struct SyslogSink {
    host: Option<String>,
    port: u16,
}

impl SyslogSink {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            host: config.syslog_host.clone(),
            port: config.syslog_port,
        }
    }
}

/// One BSD syslog line; the monitored server is used as HOSTNAME since the
/// events describe it, not the machine running the scan.
pub fn format_message(hostname: &str, at: DateTime<Local>, message: &str) -> String {
    let hostname: String = hostname
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect();
    format!(
        "<{PRIORITY}>{} {hostname} {TAG}: {message}",
        at.format("%b %e %H:%M:%S")
    )
}

#[async_trait]
impl EventSink for SyslogSink {
    fn name(&self) -> &'static str {
        "syslog"
    }

    async fn on_reconciliation_complete(
        &self,
        ctx: &NotifyContext,
        events: &[ChangeEvent],
    ) -> anyhow::Result<SinkOutcome> {
        if events.is_empty() {
            return Ok(SinkOutcome::skipped("no events detected"));
        }
        let Some(host) = self.host.as_deref() else {
            return Ok(SinkOutcome::skipped("no syslog host configured"));
        };

        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .context("binding syslog socket")?;
        socket
            .connect((host, self.port))
            .await
            .with_context(|| format!("resolving syslog host {host}:{}", self.port))?;

        for event in events {
            let line = format_message(&ctx.server_name, ctx.detected_at, &event.description);
            socket
                .send(line.as_bytes())
                .await
                .with_context(|| format!("sending syslog message to {host}"))?;
        }
        Ok(SinkOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use integrity_core::BaselineRecord;

    fn ctx() -> NotifyContext {
        NotifyContext {
            server_name: "web 01".into(),
            server_address: "127.0.0.1".into(),
            server_port: 22,
            detected_at: Local.with_ymd_and_hms(2024, 3, 5, 4, 7, 9).unwrap(),
        }
    }

    #[test]
    fn message_follows_bsd_layout() {
        let line = format_message("web 01", ctx().detected_at, "File removal was detected at '/a'");
        assert_eq!(
            line,
            "<12>Mar  5 04:07:09 web-01 remote-integrity: File removal was detected at '/a'"
        );
    }

    #[tokio::test]
    async fn skips_without_host_or_events() {
        let sink = SyslogSink::new(&LoggingConfig::default());
        let record = BaselineRecord {
            id: 1,
            host_id: 1,
            path: "/a".into(),
            checksum: "c1".into(),
        };
        let empty = sink.on_reconciliation_complete(&ctx(), &[]).await.unwrap();
        assert_eq!(empty, SinkOutcome::skipped("no events detected"));
        let unconfigured = sink
            .on_reconciliation_complete(&ctx(), &[ChangeEvent::removed(&record)])
            .await
            .unwrap();
        assert_eq!(unconfigured, SinkOutcome::skipped("no syslog host configured"));
    }

    #[tokio::test]
    async fn sends_one_datagram_per_event() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let sink = SyslogSink::new(&LoggingConfig {
            syslog_host: Some("127.0.0.1".into()),
            syslog_port: port,
        });

        let a = BaselineRecord { id: 1, host_id: 1, path: "/a".into(), checksum: "c1".into() };
        let b = BaselineRecord { id: 2, host_id: 1, path: "/b".into(), checksum: "c2".into() };
        let outcome = sink
            .on_reconciliation_complete(&ctx(), &[ChangeEvent::added(&a), ChangeEvent::removed(&b)])
            .await
            .unwrap();
        assert_eq!(outcome, SinkOutcome::Delivered);

        let mut buf = [0u8; 1024];
        let n = receiver.recv(&mut buf).await.unwrap();
        let first = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(first.ends_with("A new file was detected at '/a'"));
        let n = receiver.recv(&mut buf).await.unwrap();
        let second = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(second.ends_with("File removal was detected at '/b'"));
    }
}
