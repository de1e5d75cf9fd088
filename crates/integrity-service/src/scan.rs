//! One monitoring run: remote inventory, reconciliation, notification.

use crate::config::Config;
use crate::notify::{EventDispatcher, NotifyContext, SinkReport};
use crate::remote::{InventorySource, RemoteShell, SshShell};
use anyhow::{Context, Result};
use integrity_core::{run_pass, InventoryEntry, PassOutcome, SqliteStore, StoreBackend};
use tracing::info;

/// Scans the configured server over ssh and records the result.
pub async fn scan(config: &Config) -> Result<PassOutcome> {
    info!(
        server = %config.server.name,
        address = %config.server.address,
        port = config.server.port,
        "starting scan"
    );
    let shell = SshShell::from_config(config);
    let inventory = acquire(shell, config).await?;

    let db_path = config
        .database_path()
        .context("resolving database location")?;
    let mut store = SqliteStore::open(&db_path)
        .with_context(|| format!("opening database '{}'", db_path.display()))?;

    let ctx = NotifyContext::from_config(config);
    let dispatcher = EventDispatcher::from_config(config);
    let (outcome, _) = reconcile_and_notify(&mut store, &ctx, &inventory, &dispatcher).await?;
    Ok(outcome)
}

/// Runs the remote side to completion; nothing local is touched yet.
pub async fn acquire<S: RemoteShell>(shell: S, config: &Config) -> Result<Vec<InventoryEntry>> {
    InventorySource::new(shell, &config.filter)
        .acquire_inventory()
        .await
        .with_context(|| format!("collecting inventory from '{}'", config.server.name))
}

/// Reconciles `inventory` for `ctx.server_name`, commits, then hands the
/// committed events to the sinks.
pub async fn reconcile_and_notify<B: StoreBackend>(
    backend: &mut B,
    ctx: &NotifyContext,
    inventory: &[InventoryEntry],
    dispatcher: &EventDispatcher,
) -> Result<(PassOutcome, Vec<SinkReport>)> {
    let outcome = run_pass(backend, &ctx.server_name, inventory)
        .with_context(|| format!("reconciling '{}'", ctx.server_name))?;

    let stats = outcome.statistics;
    info!(
        added = stats.added,
        removed = stats.removed,
        modified = stats.modified,
        "integrity statistics"
    );

    let reports = dispatcher.dispatch(ctx, &outcome.events).await;
    Ok((outcome, reports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{EventSink, SinkOutcome, SinkResult};
    use async_trait::async_trait;
    use chrono::Local;
    use integrity_core::{ChangeEvent, ChangeKind, MemoryStore};
    use std::sync::{Arc, Mutex};

    struct Capture(Arc<Mutex<Vec<Vec<ChangeEvent>>>>);

    #[async_trait]
    impl EventSink for Capture {
        fn name(&self) -> &'static str {
            "capture"
        }

        async fn on_reconciliation_complete(
            &self,
            _ctx: &NotifyContext,
            events: &[ChangeEvent],
        ) -> anyhow::Result<SinkOutcome> {
            self.0.lock().unwrap().push(events.to_vec());
            Ok(SinkOutcome::Delivered)
        }
    }

    fn ctx() -> NotifyContext {
        NotifyContext {
            server_name: "web-01".into(),
            server_address: "203.0.113.10".into(),
            server_port: 22,
            detected_at: Local::now(),
        }
    }

    #[tokio::test]
    async fn sinks_see_every_pass_including_the_silent_first_one() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(Capture(Arc::clone(&seen)));
        let mut store = MemoryStore::new();

        let first = [InventoryEntry::new("/a", "c1")];
        let (outcome, reports) = reconcile_and_notify(&mut store, &ctx(), &first, &dispatcher)
            .await
            .unwrap();
        assert!(outcome.first_run);
        assert_eq!(reports[0].result, SinkResult::Delivered);

        let second = [InventoryEntry::new("/a", "c2")];
        let (outcome, _) = reconcile_and_notify(&mut store, &ctx(), &second, &dispatcher)
            .await
            .unwrap();
        assert_eq!(outcome.statistics.modified, 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_empty());
        assert_eq!(seen[1][0].kind, ChangeKind::Modified);
    }

    #[tokio::test]
    async fn failed_pass_notifies_nobody() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(Capture(Arc::clone(&seen)));
        let mut store = MemoryStore::new();

        let conflicting = [InventoryEntry::new("/a", "c1"), InventoryEntry::new("/a", "c2")];
        let result = reconcile_and_notify(&mut store, &ctx(), &conflicting, &dispatcher).await;
        assert!(result.is_err());
        assert!(seen.lock().unwrap().is_empty());
        assert!(store.hosts().is_empty());
    }
}
