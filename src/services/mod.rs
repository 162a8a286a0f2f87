//! Service layer for the monitor.
//!
//! This module contains the collaborators the check pipeline talks to:
//! - Page fetching (`Fetcher`, `HttpFetcher`)
//! - Selector narrowing (`SelectorEngine`, `HtmlSelectorEngine`)
//! - Notification channels (`Transport` and its implementations)
//! - Alert fan-out (`Notifier`)

pub mod fetcher;
pub mod notifier;
pub mod selectors;
pub mod transports;

pub use fetcher::{FetchResponse, Fetcher, HttpFetcher, RetryPolicy, fetch_with_retry};
pub use notifier::Notifier;
pub use selectors::{HtmlSelectorEngine, SelectorEngine};
pub use transports::{
    DesktopTransport, EmailTransport, LogTransport, Message, Transport, WebhookTransport,
};
