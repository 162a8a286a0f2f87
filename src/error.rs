// src/error.rs

//! Unified error handling for the monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Ignore pattern failed to compile
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Fetch failed before a response was received
    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Fetch exceeded its time budget
    #[error("Fetch timed out for {url} after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Server answered with a non-success status
    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Content could not be turned into text
    #[error("Extract error: {0}")]
    Extract(String),

    /// Snapshot persistence failed
    #[error("Store error for {key}: {message}")]
    Store { key: String, message: String },

    /// A notification transport failed
    #[error("Delivery via {transport} failed: {message}")]
    Delivery { transport: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Lookup of an unknown site
    #[error("Site not found: {0}")]
    SiteNotFound(String),

    /// Site key already registered
    #[error("Site already exists: {0}")]
    DuplicateSite(String),
}

/// Coarse error classes used to classify a check's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    Extract,
    Store,
    Delivery,
    Config,
    Other,
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a fetch error for a URL.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error.
    pub fn extract(message: impl Into<String>) -> Self {
        Self::Extract(message.into())
    }

    /// Create a store error for a site key.
    pub fn store(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Store {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a delivery error for a transport.
    pub fn delivery(transport: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Delivery {
            transport: transport.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Fetch { .. } | Self::Timeout { .. } | Self::HttpStatus { .. } => {
                ErrorKind::Fetch
            }
            Self::Extract(_) => ErrorKind::Extract,
            Self::Store { .. } | Self::Io(_) | Self::Json(_) => ErrorKind::Store,
            Self::Delivery { .. } => ErrorKind::Delivery,
            Self::Config(_)
            | Self::Validation(_)
            | Self::Regex(_)
            | Self::Selector { .. }
            | Self::Url(_)
            | Self::DuplicateSite(_) => ErrorKind::Config,
            Self::Toml(_) | Self::TomlSerialize(_) | Self::SiteNotFound(_) => ErrorKind::Other,
        }
    }
}
