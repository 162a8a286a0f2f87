//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{MAX_INTERVAL_SECS, NotifyTarget, Site};

/// Root application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Scheduling and failure policy
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// HTTP fetch behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Notification transport settings
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Monitored sites, in registry order
    #[serde(default)]
    pub sites: Vec<Site>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_INTERVAL_SECS).contains(&self.monitor.default_interval_secs) {
            return Err(AppError::validation(format!(
                "monitor.default_interval_secs must be between 1 and {MAX_INTERVAL_SECS}"
            )));
        }
        if self.monitor.max_concurrent == 0 {
            return Err(AppError::validation("monitor.max_concurrent must be > 0"));
        }
        if self.monitor.failure_threshold == 0 {
            return Err(AppError::validation(
                "monitor.failure_threshold must be > 0",
            ));
        }
        if self.monitor.max_idle_secs == 0 {
            return Err(AppError::validation("monitor.max_idle_secs must be > 0"));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.retry_count == 0 {
            return Err(AppError::validation("fetch.retry_count must be > 0"));
        }
        for target in &self.notify.default_targets {
            target.validate()?;
        }

        let mut keys = HashSet::new();
        for site in &self.sites {
            site.validate()?;
            if !keys.insert(&site.key) {
                return Err(AppError::DuplicateSite(site.key.to_string()));
            }
        }
        Ok(())
    }

    /// Directory holding per-site snapshots.
    pub fn data_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.monitor.data_dir)
    }
}

/// Scheduling and failure policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval for sites that do not set their own
    #[serde(default = "defaults::default_interval")]
    pub default_interval_secs: u64,

    /// Maximum checks in flight at once
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Consecutive failures before a site is flagged degraded
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u32,

    /// Longest the daemon sleeps before re-reading the registry
    #[serde(default = "defaults::max_idle")]
    pub max_idle_secs: u64,

    /// Snapshot directory, relative to the config file
    #[serde(default = "defaults::data_dir")]
    pub data_dir: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: defaults::default_interval(),
            max_concurrent: defaults::max_concurrent(),
            failure_threshold: defaults::failure_threshold(),
            max_idle_secs: defaults::max_idle(),
            data_dir: defaults::data_dir(),
        }
    }
}

/// HTTP fetch behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-attempt timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Attempts per check, including the first
    #[serde(default = "defaults::retry_count")]
    pub retry_count: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            retry_count: defaults::retry_count(),
            retry_delay_ms: defaults::retry_delay(),
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Targets for sites that list none
    #[serde(default = "defaults::default_targets")]
    pub default_targets: Vec<NotifyTarget>,

    #[serde(default)]
    pub desktop: DesktopConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            default_targets: defaults::default_targets(),
            desktop: DesktopConfig::default(),
            email: EmailConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

/// Desktop notifications through the platform notifier command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
        }
    }
}

/// Email submitted through a local sendmail-compatible binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "defaults::sendmail_path")]
    pub sendmail_path: String,

    #[serde(default = "defaults::from_addr")]
    pub from: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sendmail_path: defaults::sendmail_path(),
            from: defaults::from_addr(),
        }
    }
}

/// Webhook POST settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "defaults::webhook_timeout")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::webhook_timeout(),
        }
    }
}

mod defaults {
    use crate::models::NotifyTarget;

    // Monitor defaults
    pub fn default_interval() -> u64 {
        3600
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn failure_threshold() -> u32 {
        3
    }
    pub fn max_idle() -> u64 {
        60
    }
    pub fn data_dir() -> String {
        "monitor_data".into()
    }

    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; sitewatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn retry_count() -> u32 {
        3
    }
    pub fn retry_delay() -> u64 {
        5000
    }

    // Notify defaults
    pub fn default_targets() -> Vec<NotifyTarget> {
        vec![NotifyTarget::Desktop]
    }
    pub fn enabled() -> bool {
        true
    }
    pub fn sendmail_path() -> String {
        "/usr/sbin/sendmail".into()
    }
    pub fn from_addr() -> String {
        "sitewatch@localhost".into()
    }
    pub fn webhook_timeout() -> u64 {
        10
    }
}
