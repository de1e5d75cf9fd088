//! Human-readable incident report shared by the mail and Telegram sinks.

use super::NotifyContext;
use integrity_core::ChangeEvent;

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

pub fn incident_subject(count: usize) -> String {
    format!("Suspicious activity detected ({count} incident{})", plural(count))
}

pub fn incident_body(ctx: &NotifyContext, events: &[ChangeEvent]) -> String {
    let incidents: Vec<String> = events
        .iter()
        .map(|e| format!("\t{}", e.description))
        .collect();

    let mut body = String::new();
    body.push_str("Dear Administrator,\n\n");
    body.push_str("The remote integrity monitor has detected suspicious activity on your server.\n");
    body.push_str(&format!(
        "For your own protection we ask you to review the following incident{}:\n\n",
        plural(events.len())
    ));
    body.push_str(&format!(
        "\tServer: '{}' ({}:{})\n",
        ctx.server_name, ctx.server_address, ctx.server_port
    ));
    body.push_str(&format!(
        "\tTimestamp: {}\n",
        ctx.detected_at.format("%B %d, %Y on %H:%M:%S")
    ));
    body.push_str(&format!("\tNumber of incidents: {}\n\n", events.len()));
    body.push_str(&incidents.join("\n"));
    body.push_str("\n\nKind regards,\nRemote Integrity Monitor");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use integrity_core::BaselineRecord;

    fn record(path: &str) -> BaselineRecord {
        BaselineRecord {
            id: 1,
            host_id: 1,
            path: path.into(),
            checksum: "c1".into(),
        }
    }

    #[test]
    fn subject_pluralises() {
        assert_eq!(incident_subject(1), "Suspicious activity detected (1 incident)");
        assert_eq!(incident_subject(3), "Suspicious activity detected (3 incidents)");
    }

    #[test]
    fn body_lists_every_event() {
        let ctx = NotifyContext {
            server_name: "web-01".into(),
            server_address: "203.0.113.10".into(),
            server_port: 2222,
            detected_at: Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap(),
        };
        let events = vec![
            ChangeEvent::added(&record("/var/www/shell.php")),
            ChangeEvent::removed(&record("/var/www/index.php")),
        ];
        let body = incident_body(&ctx, &events);

        assert!(body.contains("\tServer: 'web-01' (203.0.113.10:2222)\n"));
        assert!(body.contains("\tTimestamp: March 05, 2024 on 14:07:09\n"));
        assert!(body.contains("\tNumber of incidents: 2\n"));
        assert!(body.contains("review the following incidents:"));
        assert!(body.contains(
            "\tA new file was detected at '/var/www/shell.php'\n\tFile removal was detected at '/var/www/index.php'"
        ));
    }
}
