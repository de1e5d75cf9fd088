//! Remote inventory acquisition.
//!
//! Files are enumerated and hashed on the remote host itself
//! (`find ... -exec sha512sum`), so only `(checksum, path)` lines cross the
//! wire. All remote work finishes before the baseline store is touched.

use crate::config::{Config, FilterConfig};
use async_trait::async_trait;
use integrity_core::{is_valid_checksum, InventoryEntry};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Failed to start ssh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Unable to connect to remote server: {0}")]
    Connection(String),

    #[error("Remote command '{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Unable to run '{command}', reason: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unable to locate the php extension directory: {0}")]
    DirectoryNotFound(String),

    #[error("Cannot quote path for the remote shell: {0}")]
    Quote(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// The remote tools report problems on stderr, so any stderr output
    /// counts as failure.
    pub fn succeeded(&self) -> bool {
        self.stderr.trim().is_empty()
    }
}

/// Runs shell commands on the monitored host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, command: &str) -> Result<ExecOutput, RemoteError>;
}

/// [`RemoteShell`] over the system `ssh` client in batch mode.
#[derive(Debug, Clone)]
pub struct SshShell {
    destination: String,
    port: u16,
    identity: PathBuf,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshShell {
    pub fn from_config(config: &Config) -> Self {
        Self {
            destination: format!("{}@{}", config.auth.username, config.server.address),
            port: config.server.port,
            identity: config.auth.private_key.clone(),
            connect_timeout: config.timeouts.connect(),
            command_timeout: config.timeouts.command(),
        }
    }

    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-i")
            .arg(&self.identity)
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg(&self.destination)
            .arg("--")
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// ssh exits with 255 when it could not reach or authenticate to the host.
const SSH_CONNECTION_FAILURE: i32 = 255;

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, command: &str) -> Result<ExecOutput, RemoteError> {
        debug!(destination = %self.destination, command, "running remote command");
        let output = tokio::time::timeout(self.command_timeout, self.command(command).output())
            .await
            .map_err(|_| RemoteError::Timeout {
                command: command.to_string(),
                secs: self.command_timeout.as_secs(),
            })??;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_CONNECTION_FAILURE) {
            return Err(RemoteError::Connection(stderr.trim().to_string()));
        }
        Ok(ExecOutput {
            stdout: decode_stdout(&output.stdout),
            stderr,
        })
    }
}

/// Keeps the stdout lines that are valid UTF-8 and drops the rest with a
/// warning. Lossy decoding would map distinct file names onto the same path.
fn decode_stdout(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut dropped = 0usize;
    for line in bytes.split_inclusive(|&b| b == b'\n') {
        match std::str::from_utf8(line) {
            Ok(line) => out.push_str(line),
            Err(_) => {
                dropped += 1;
                warn!(
                    line = %String::from_utf8_lossy(line).trim_end(),
                    "skipping remote output line that is not valid UTF-8"
                );
            }
        }
    }
    if dropped > 0 {
        warn!(dropped, "files with non UTF-8 names are not monitored");
    }
    out
}

/// Path filter applied to every enumerated file.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    files: Vec<String>,
    directories: Vec<String>,
}

impl Blacklist {
    pub fn new(files: &[String], directories: &[String]) -> Self {
        let directories = directories
            .iter()
            .map(|d| {
                if d.ends_with('/') {
                    d.clone()
                } else {
                    format!("{d}/")
                }
            })
            .collect();
        Self {
            files: files.to_vec(),
            directories,
        }
    }

    /// A path is dropped if it lies under an ignored directory or its file
    /// name is ignored.
    pub fn is_blacklisted(&self, path: &str) -> bool {
        if self.directories.iter().any(|dir| path.contains(dir.as_str())) {
            return true;
        }
        let file_name = path.rsplit('/').next().unwrap_or(path);
        self.files.iter().any(|f| f == file_name)
    }
}

/// Parses `sha512sum` output into inventory entries, skipping (with a
/// warning) every line that is not `<128 hex chars>  <path>`.
pub fn parse_checksum_output(output: &str) -> Vec<InventoryEntry> {
    let mut entries = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_checksum_line(line) {
            Some(entry) => entries.push(entry),
            None => warn!(line, "unable to parse checksum output"),
        }
    }
    entries
}

fn parse_checksum_line(line: &str) -> Option<InventoryEntry> {
    // sha512sum prefixes the line with '\' when it had to escape the name.
    let (escaped, line) = match line.strip_prefix('\\') {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let (checksum, path) = line.split_once("  ")?;
    if !is_valid_checksum(checksum) || path.is_empty() {
        return None;
    }
    let path = if escaped {
        unescape_path(path)?
    } else {
        path.to_string()
    };
    Some(InventoryEntry::new(path, checksum.to_ascii_lowercase()))
}

fn unescape_path(path: &str) -> Option<String> {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

fn quote(path: &str) -> Result<String, RemoteError> {
    shlex::try_quote(path)
        .map(|q| q.into_owned())
        .map_err(|e| RemoteError::Quote(e.to_string()))
}

/// Produces the inventory of one host.
pub struct InventorySource<S> {
    shell: S,
    start_directory: String,
    scan_php_modules: bool,
    ignore_files: Vec<String>,
    ignore_directories: Vec<String>,
}

impl<S: RemoteShell> InventorySource<S> {
    pub fn new(shell: S, filter: &FilterConfig) -> Self {
        Self {
            shell,
            start_directory: filter.start_directory.clone(),
            scan_php_modules: filter.scan_php_modules,
            ignore_files: filter.ignore_files.clone(),
            ignore_directories: filter.ignore_directories.clone(),
        }
    }

    /// Enumerates and hashes every file below the start directory and,
    /// when enabled, the PHP extension directory.
    pub async fn acquire_inventory(&self) -> Result<Vec<InventoryEntry>, RemoteError> {
        let start = self.resolve_directory(&self.start_directory).await?;
        let blacklist = self.blacklist().await?;
        let mut inventory = self.checksums_under(&start, &blacklist).await?;

        if self.scan_php_modules {
            match self.php_extension_dir().await {
                Ok(dir) => inventory.extend(self.checksums_under(&dir, &blacklist).await?),
                Err(RemoteError::DirectoryNotFound(reason)) => {
                    warn!(%reason, "skipping php module check");
                    warn!("install the 'php-dev' package or add a second configuration pointing at the php modules");
                }
                Err(e) => return Err(e),
            }
        }

        info!(files = inventory.len(), "remote inventory acquired");
        Ok(inventory)
    }

    /// Ignored directories written as `~...` or `./...` are made absolute on
    /// the remote host; other entries keep substring matching.
    async fn blacklist(&self) -> Result<Blacklist, RemoteError> {
        let mut directories = Vec::with_capacity(self.ignore_directories.len());
        for dir in &self.ignore_directories {
            if dir == "~" || dir.starts_with("~/") || dir.starts_with("./") {
                let resolved = self.resolve_directory(dir).await?;
                debug!(configured = %dir, %resolved, "ignore directory resolved");
                directories.push(resolved);
            } else {
                directories.push(dir.clone());
            }
        }
        Ok(Blacklist::new(&self.ignore_files, &directories))
    }

    async fn checksums_under(
        &self,
        directory: &str,
        blacklist: &Blacklist,
    ) -> Result<Vec<InventoryEntry>, RemoteError> {
        let command = format!("find {} -type f -exec sha512sum \"{{}}\" +", quote(directory)?);
        let output = self.shell.exec(&command).await?;
        if !output.succeeded() {
            return Err(RemoteError::CommandFailed {
                command,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let entries: Vec<_> = parse_checksum_output(&output.stdout)
            .into_iter()
            .filter(|e| !blacklist.is_blacklisted(&e.path))
            .collect();
        debug!(directory, files = entries.len(), "directory hashed");
        Ok(entries)
    }

    /// Turns `~`, `./` and relative start directories into absolute paths
    /// using the remote home and working directories.
    async fn resolve_directory(&self, path: &str) -> Result<String, RemoteError> {
        if path.starts_with('/') {
            return Ok(path.to_string());
        }
        if path == "~" {
            return self.remote_value("echo $HOME").await;
        }
        if let Some(rest) = path.strip_prefix("~/") {
            let home = self.remote_value("echo $HOME").await?;
            return Ok(join(&home, rest));
        }
        let cwd = self.remote_value("pwd").await?;
        let rest = path.strip_prefix("./").unwrap_or(path);
        Ok(join(&cwd, rest))
    }

    async fn php_extension_dir(&self) -> Result<String, RemoteError> {
        let output = self.shell.exec("php-config --extension-dir").await?;
        let dir = output.stdout.trim();
        if !output.succeeded() || dir.is_empty() {
            return Err(RemoteError::DirectoryNotFound(output.stderr.trim().to_string()));
        }
        Ok(dir.to_string())
    }

    async fn remote_value(&self, command: &str) -> Result<String, RemoteError> {
        let output = self.shell.exec(command).await?;
        if !output.succeeded() {
            return Err(RemoteError::CommandFailed {
                command: command.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }
}

fn join(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    if rest.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{rest}")
    }
}
