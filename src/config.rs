//! Configuration management
//!
//! Settings come from an optional TOML file, overridden by `CDLOGIN__*`
//! environment variables (for example `CDLOGIN__RETRY__FAILURE_DELAY=600`).
//! Every field has a default, so running without any file is fine.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CDLOGIN";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Reschedule delays after an attempt
    #[serde(default)]
    pub retry: RetryConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Nameserver query settings
    #[serde(default)]
    pub dns: DnsConfig,

    /// Desktop notifications
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Global daemon settings
#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    /// Seconds between checks for a captive WiFi network while an
    /// automatic attempt is due
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
        }
    }
}

/// Delays (seconds) before the next automatic attempt
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// After a successful login, to pick up portal-side changes
    #[serde(default = "default_success_delay")]
    pub success_delay: u64,

    /// After a request timed out; usually a weak signal
    #[serde(default = "default_timeout_delay")]
    pub timeout_delay: u64,

    /// After any other failure
    #[serde(default = "default_failure_delay")]
    pub failure_delay: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            success_delay: default_success_delay(),
            timeout_delay: default_timeout_delay(),
            failure_delay: default_failure_delay(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DnsConfig {
    /// Per-query timeout in seconds
    #[serde(default = "default_dns_timeout")]
    pub timeout: u64,

    /// Queries sent before giving up
    #[serde(default = "default_dns_attempts")]
    pub attempts: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout: default_dns_timeout(),
            attempts: default_dns_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Program called as `<command> <title> <message>`
    #[serde(default = "default_notify_command")]
    pub command: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_notify_command(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file path
    #[serde(default)]
    pub log_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: String::new(),
        }
    }
}

// Default value functions
fn default_check_interval() -> u64 {
    5
}

fn default_success_delay() -> u64 {
    60
}

fn default_timeout_delay() -> u64 {
    60
}

fn default_failure_delay() -> u64 {
    300
}

fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_dns_timeout() -> u64 {
    3
}

fn default_dns_attempts() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_notify_command() -> String {
    "notify-send".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `explicit`, or the first file found in the
    /// usual locations, then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::candidate_paths().into_iter().find(|p| p.exists()),
        };

        let mut builder = ::config::Config::builder();
        match &path {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                builder = builder.add_source(::config::File::from(path.as_path()));
            }
            None => tracing::debug!("No config file found, using defaults"),
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/cdlogin/config.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("cdlogin/config.toml"));
        }
        paths
    }

    pub fn validate(&self) -> Result<()> {
        if self.global.check_interval == 0 {
            bail!("global.check_interval must be at least 1 second");
        }
        if self.retry.timeout_delay >= self.retry.failure_delay {
            bail!(
                "retry.timeout_delay ({}s) must be shorter than retry.failure_delay ({}s)",
                self.retry.timeout_delay,
                self.retry.failure_delay
            );
        }
        if self.http.timeout == 0 || self.dns.timeout == 0 {
            bail!("http.timeout and dns.timeout must be at least 1 second");
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn success(&self) -> Duration {
        Duration::from_secs(self.success_delay)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_delay)
    }

    pub fn failure(&self) -> Duration {
        Duration::from_secs(self.failure_delay)
    }
}
