//! Remote integrity monitor service: configuration, ssh inventory, sinks,
//! and the scan/list commands built on `integrity-core`.

pub mod config;
pub mod inspector;
pub mod notify;
pub mod remote;
pub mod scan;

pub use config::{Config, ConfigError};
pub use notify::{EventDispatcher, EventSink, NotifyContext, SinkOutcome};
pub use remote::{InventorySource, RemoteError, RemoteShell, SshShell};
