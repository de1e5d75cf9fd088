//! Scan configuration, loaded from a TOML file.
//!
//! ```toml
//! [server]
//! name = "web-01"
//! address = "203.0.113.10"
//! port = 22
//!
//! [auth]
//! username = "monitor"
//! private_key = "~/.ssh/id_ed25519"
//!
//! [filter]
//! start_directory = "~/public_html"
//! ignore_files = ["error_log"]
//! ignore_directories = ["~/public_html/cache"]
//! scan_php_modules = true
//! ```
//!
//! A leading `~` or `./` in `start_directory` and `ignore_directories` is
//! resolved on the monitored host, not locally.
//!
//! `[email]`, `[telegram]`, `[logging]`, `[database]` and `[timeouts]` are
//! optional. A notification channel whose destination is left unset simply
//! stays quiet.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file '{0}' does not exist, did you specify the correct path?")]
    NotFound(PathBuf),

    #[error("Cannot read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing value for '{field}' in configuration file '{path}'")]
    MissingValue { field: &'static str, path: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub start_directory: String,
    #[serde(default)]
    pub ignore_files: Vec<String>,
    #[serde(default)]
    pub ignore_directories: Vec<String>,
    #[serde(default = "default_true")]
    pub scan_php_modules: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    #[serde(default)]
    pub starttls: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub noreply_address: Option<String>,
}

impl EmailConfig {
    /// SMTP login as `(user, password)`; attempted only when both are set.
    pub fn smtp_login(&self) -> Option<(&str, &str)> {
        Some((self.smtp_user.as_deref()?, self.smtp_pass.as_deref()?))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    pub api_token: Option<String>,
    pub chat_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub syslog_host: Option<String>,
    #[serde(default = "default_syslog_port")]
    pub syslog_port: u16,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            syslog_host: None,
            syslog_port: default_syslog_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            command_secs: default_command_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub filter: FilterConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Parses and validates `raw`; `origin` is only used in error messages.
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.normalise();
        config.validate(origin)?;
        Ok(config)
    }

    /// Where the baseline database lives.
    pub fn database_path(&self) -> std::io::Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(expand_home(path)),
            None => integrity_core::paths::default_database_path(),
        }
    }

    fn normalise(&mut self) {
        self.auth.private_key = expand_home(&self.auth.private_key);

        let email = &mut self.email;
        for field in [
            &mut email.smtp_host,
            &mut email.smtp_user,
            &mut email.smtp_pass,
            &mut email.noreply_address,
        ] {
            blank_to_none(field);
        }
        email.recipients.retain(|r| !r.trim().is_empty());

        blank_to_none(&mut self.telegram.api_token);
        blank_to_none(&mut self.logging.syslog_host);

        self.filter.ignore_files.retain(|f| !f.trim().is_empty());
        self.filter.ignore_directories.retain(|d| !d.trim().is_empty());
    }

    fn validate(&self, origin: &Path) -> Result<(), ConfigError> {
        let required: [(&'static str, bool); 5] = [
            ("server.name", self.server.name.trim().is_empty()),
            ("server.address", self.server.address.trim().is_empty()),
            ("auth.username", self.auth.username.trim().is_empty()),
            ("auth.private_key", self.auth.private_key.as_os_str().is_empty()),
            ("filter.start_directory", self.filter.start_directory.trim().is_empty()),
        ];
        match required.iter().find(|(_, missing)| *missing) {
            Some(&(field, _)) => Err(ConfigError::MissingValue {
                field,
                path: origin.to_path_buf(),
            }),
            None => Ok(()),
        }
    }
}

fn blank_to_none(value: &mut Option<String>) {
    if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
        *value = None;
    }
}

/// Expands a leading `~` to the local home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_syslog_port() -> u16 {
    514
}

fn default_true() -> bool {
    true
}

fn default_connect_secs() -> u64 {
    10
}

fn default_command_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        name = "web-01"
        address = "203.0.113.10"

        [auth]
        username = "monitor"
        private_key = "/keys/id_ed25519"

        [filter]
        start_directory = "/var/www"
    "#;

    fn origin() -> PathBuf {
        PathBuf::from("test.toml")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml_str(MINIMAL, &origin()).unwrap();
        assert_eq!(config.server.port, 22);
        assert!(config.filter.scan_php_modules);
        assert!(config.filter.ignore_files.is_empty());
        assert_eq!(config.logging.syslog_port, 514);
        assert!(config.logging.syslog_host.is_none());
        assert_eq!(config.timeouts.command(), Duration::from_secs(600));
        assert!(config.email.smtp_login().is_none());
    }

    #[test]
    fn blank_optional_values_are_unset() {
        let raw = format!(
            "{MINIMAL}
            [email]
            smtp_host = \"\"
            smtp_user = \"mailer\"
            recipients = [\"\", \"ops@example.com\"]

            [telegram]
            api_token = \"  \"
            "
        );
        let config = Config::from_toml_str(&raw, &origin()).unwrap();
        assert!(config.email.smtp_host.is_none());
        assert_eq!(config.email.recipients, vec!["ops@example.com"]);
        assert!(config.email.smtp_login().is_none());
        assert!(config.telegram.api_token.is_none());
    }

    #[test]
    fn empty_required_value_is_rejected() {
        let raw = MINIMAL.replace("\"web-01\"", "\"\"");
        let err = Config::from_toml_str(&raw, &origin()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue { field: "server.name", .. }));
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let raw = MINIMAL.replace("[filter]", "[filters]");
        let err = Config::from_toml_str(&raw, &origin()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn explicit_database_path_wins() {
        let raw = format!("{MINIMAL}\n[database]\npath = \"/srv/integrity.db\"\n");
        let config = Config::from_toml_str(&raw, &origin()).unwrap();
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/srv/integrity.db")
        );
    }

    #[test]
    fn smtp_login_needs_user_and_password() {
        let raw = format!(
            "{MINIMAL}
            [email]
            smtp_user = \"mailer\"
            smtp_pass = \"hunter2\"
            "
        );
        let config = Config::from_toml_str(&raw, &origin()).unwrap();
        assert_eq!(config.email.smtp_login(), Some(("mailer", "hunter2")));
    }
}
