// src/models/mod.rs

//! Domain models for the monitor.
//!
//! This module contains the data structures shared by the pipeline,
//! storage, and scheduler layers.

mod check;
mod config;
mod site;
mod snapshot;

// Re-export all public types
pub use check::{CheckOutcome, CheckResult, DeliveryResult, DeliveryStatus, SiteStatus};
pub use config::{
    Config, DesktopConfig, EmailConfig, FetchConfig, MonitorConfig, NotifyConfig, WebhookConfig,
};
pub use site::{MAX_INTERVAL_SECS, NotifyTarget, Site, SiteKey, TransportKind};
pub use snapshot::Snapshot;
