// src/models/site.rs

//! Monitored site definitions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

const MAX_KEY_LEN: usize = 96;

/// Longest accepted check interval: one year.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// Stable identity of a monitored site.
///
/// Keys are lowercase slugs (`[a-z0-9._-]`), which also makes them safe
/// to use as directory names in the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteKey(String);

impl SiteKey {
    /// Parse an already-slugged key, rejecting anything that is not one.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_KEY_LEN
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c));
        if !valid {
            return Err(AppError::config(format!("invalid site key '{raw}'")));
        }
        Ok(Self(raw.to_string()))
    }

    /// Turn an arbitrary name into a key.
    pub fn slug(name: &str) -> Result<Self> {
        let mut slug = String::with_capacity(name.len());
        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug: String = slug.trim_matches('-').chars().take(MAX_KEY_LEN).collect();
        Self::parse(slug.trim_end_matches('-'))
    }

    /// Derive a key from the host and path of a URL.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::config(format!("URL has no host: {raw}")))?;
        Self::slug(&format!("{host}{}", url.path()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SiteKey {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SiteKey> for String {
    fn from(key: SiteKey) -> Self {
        key.0
    }
}

/// Channel a notification goes out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Desktop,
    Email,
    Webhook,
    Log,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Desktop => "desktop",
            TransportKind::Email => "email",
            TransportKind::Webhook => "webhook",
            TransportKind::Log => "log",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a site's change alerts are delivered.
///
/// Stored as the same string the CLI accepts, e.g. `"email:a@example.com"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NotifyTarget {
    Desktop,
    Email { to: Vec<String> },
    Webhook { url: String },
    Log,
}

impl NotifyTarget {
    pub fn kind(&self) -> TransportKind {
        match self {
            NotifyTarget::Desktop => TransportKind::Desktop,
            NotifyTarget::Email { .. } => TransportKind::Email,
            NotifyTarget::Webhook { .. } => TransportKind::Webhook,
            NotifyTarget::Log => TransportKind::Log,
        }
    }

    /// Check the target's own parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            NotifyTarget::Email { to } => {
                if to.is_empty() {
                    return Err(AppError::config("email target has no recipients"));
                }
                if let Some(bad) = to.iter().find(|addr| !addr.contains('@')) {
                    return Err(AppError::config(format!("invalid email address '{bad}'")));
                }
                Ok(())
            }
            NotifyTarget::Webhook { url } => validate_http_url(url),
            NotifyTarget::Desktop | NotifyTarget::Log => Ok(()),
        }
    }
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyTarget::Desktop => f.write_str("desktop"),
            NotifyTarget::Log => f.write_str("log"),
            NotifyTarget::Email { to } => write!(f, "email:{}", to.join(",")),
            NotifyTarget::Webhook { url } => write!(f, "webhook:{url}"),
        }
    }
}

/// Parses `desktop`, `log`, `email:a@x,b@y` and `webhook:https://...`.
impl FromStr for NotifyTarget {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = match s.split_once(':') {
            Some((kind, rest)) => (kind.trim(), Some(rest.trim())),
            None => (s.trim(), None),
        };
        let target = match (kind.to_ascii_lowercase().as_str(), rest) {
            ("desktop", None) => NotifyTarget::Desktop,
            ("log", None) => NotifyTarget::Log,
            ("email", Some(list)) => NotifyTarget::Email {
                to: list
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect(),
            },
            ("webhook", Some(url)) => NotifyTarget::Webhook {
                url: url.to_string(),
            },
            _ => return Err(AppError::config(format!("unknown notify target '{s}'"))),
        };
        target.validate()?;
        Ok(target)
    }
}

impl TryFrom<String> for NotifyTarget {
    type Error = AppError;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<NotifyTarget> for String {
    fn from(target: NotifyTarget) -> Self {
        target.to_string()
    }
}

/// A monitored site as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Unique key within the registry
    pub key: SiteKey,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Page to fetch
    pub url: String,

    /// CSS selector narrowing the watched region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Regexes whose matches are blanked before comparison
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_patterns: Vec<String>,

    /// Check interval; falls back to the global default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Notification targets; falls back to the global defaults when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<NotifyTarget>,
}

fn default_enabled() -> bool {
    true
}

impl Site {
    /// Create a site with a key derived from its URL.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let key = SiteKey::from_url(&url)?;
        Ok(Self::with_key(key, url))
    }

    pub fn with_key(key: SiteKey, url: impl Into<String>) -> Self {
        Self {
            key,
            name: None,
            url: url.into(),
            selector: None,
            ignore_patterns: Vec::new(),
            interval_secs: None,
            enabled: true,
            targets: Vec::new(),
        }
    }

    /// Name for display, falling back to the key.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.key.as_str())
    }

    /// Effective check interval.
    pub fn interval(&self, default_secs: u64) -> Duration {
        Duration::from_secs(self.interval_secs.unwrap_or(default_secs))
    }

    /// Effective notification targets.
    pub fn targets_or<'a>(&'a self, defaults: &'a [NotifyTarget]) -> &'a [NotifyTarget] {
        if self.targets.is_empty() {
            defaults
        } else {
            &self.targets
        }
    }

    /// Reject definitions the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        validate_http_url(&self.url)?;

        if let Some(secs) = self.interval_secs {
            if secs == 0 || secs > MAX_INTERVAL_SECS {
                return Err(AppError::config(format!(
                    "site '{}': interval must be between 1 and {MAX_INTERVAL_SECS} seconds",
                    self.key
                )));
            }
        }

        if let Some(selector) = &self.selector {
            Selector::parse(selector).map_err(|e| AppError::selector(selector, format!("{e:?}")))?;
        }

        for pattern in &self.ignore_patterns {
            Regex::new(pattern).map_err(|e| {
                AppError::config(format!(
                    "site '{}': invalid ignore pattern '{pattern}': {e}",
                    self.key
                ))
            })?;
        }

        for target in &self.targets {
            target.validate()?;
        }
        Ok(())
    }
}

fn validate_http_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::config(format!(
            "invalid URL '{raw}': expected http(s)://host"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_url() {
        let key = SiteKey::from_url("https://Example.com/news/latest?page=2").unwrap();
        assert_eq!(key.as_str(), "example-com-news-latest");
    }

    #[test]
    fn test_key_rejects_path_characters() {
        assert!(SiteKey::parse("../etc").is_err());
        assert!(SiteKey::parse("").is_err());
        assert!(SiteKey::parse("Upper").is_err());
        assert!(SiteKey::parse("price-watch_1.0").is_ok());
    }

    #[test]
    fn test_slug_collapses_separators() {
        assert_eq!(SiteKey::slug("  My   Shop!! ").unwrap().as_str(), "my-shop");
        assert!(SiteKey::slug("!!!").is_err());
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("desktop".parse::<NotifyTarget>().unwrap(), NotifyTarget::Desktop);
        assert_eq!(
            "email:a@example.com, b@example.com"
                .parse::<NotifyTarget>()
                .unwrap(),
            NotifyTarget::Email {
                to: vec!["a@example.com".into(), "b@example.com".into()]
            }
        );
        assert!("email:".parse::<NotifyTarget>().is_err());
        assert!("webhook:ftp://x".parse::<NotifyTarget>().is_err());
        assert!("pager".parse::<NotifyTarget>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_sites() {
        let mut site = Site::new("https://example.com").unwrap();
        assert!(site.validate().is_ok());

        site.interval_secs = Some(0);
        assert!(site.validate().is_err());
        site.interval_secs = Some(10_000_000_000_000);
        assert!(site.validate().is_err());
        site.interval_secs = Some(MAX_INTERVAL_SECS);
        assert!(site.validate().is_ok());
        site.interval_secs = Some(60);

        site.ignore_patterns = vec!["(unclosed".into()];
        assert!(site.validate().is_err());
        site.ignore_patterns.clear();

        site.selector = Some("[[".into());
        assert!(site.validate().is_err());
        site.selector = None;

        site.url = "mailto:someone@example.com".into();
        assert!(site.validate().is_err());
    }

    #[test]
    fn test_site_toml_round_trip() {
        let mut site = Site::new("https://example.com/prices").unwrap();
        site.name = Some("Prices".into());
        site.selector = Some("#price".into());
        site.ignore_patterns = vec![r"\d{2}:\d{2}:\d{2}".into()];
        site.interval_secs = Some(900);
        site.targets = vec![
            NotifyTarget::Desktop,
            NotifyTarget::Webhook {
                url: "https://hooks.example.com/x".into(),
            },
        ];
        site.enabled = false;

        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            sites: Vec<Site>,
        }

        let text = toml::to_string(&Wrapper {
            sites: vec![site.clone()],
        })
        .unwrap();
        assert!(text.contains(r#""webhook:https://hooks.example.com/x""#));
        assert!(!text.contains("kind"));
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.sites, vec![site]);
    }

    #[test]
    fn test_interval_fallback() {
        let mut site = Site::new("https://example.com").unwrap();
        assert_eq!(site.interval(3600), Duration::from_secs(3600));
        site.interval_secs = Some(30);
        assert_eq!(site.interval(3600), Duration::from_secs(30));
    }
}
