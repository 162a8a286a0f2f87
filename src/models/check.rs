// src/models/check.rs

//! Check results and per-site runtime status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{NotifyTarget, SiteKey, TransportKind};
use crate::pipeline::ChangeReport;

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "kebab-case")]
pub enum CheckOutcome {
    /// First capture for the site; stored as the baseline, never notified
    Baseline,
    Unchanged,
    Changed,
    FetchError(String),
    ExtractError(String),
    /// Persisting the snapshot failed; the baseline did not advance
    StoreError(String),
}

impl CheckOutcome {
    /// Fetch and extract failures count toward degradation.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FetchError(_) | Self::ExtractError(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Baseline | Self::Unchanged | Self::Changed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::FetchError(_) => "fetch-error",
            Self::ExtractError(_) => "extract-error",
            Self::StoreError(_) => "store-error",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::FetchError(m) | Self::ExtractError(m) | Self::StoreError(m) => Some(m),
            _ => None,
        }
    }
}

/// Whether a transport accepted an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
}

/// Result of delivering one alert to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub target: NotifyTarget,
    pub status: DeliveryStatus,
}

impl DeliveryResult {
    pub fn delivered(target: NotifyTarget) -> Self {
        Self {
            target,
            status: DeliveryStatus::Delivered,
        }
    }

    pub fn failed(target: NotifyTarget, error: impl Into<String>) -> Self {
        Self {
            target,
            status: DeliveryStatus::Failed(error.into()),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.target.kind()
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self.status, DeliveryStatus::Delivered)
    }
}

/// Everything one check produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub site_key: SiteKey,
    pub outcome: CheckOutcome,

    /// Present when a change was detected (also on a store error after detection)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ChangeReport>,

    /// One entry per notification target, empty unless notified
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliveries: Vec<DeliveryResult>,

    /// Consecutive fetch/extract failures after this check
    pub consecutive_failures: u32,
    pub degraded: bool,

    /// Sequence of the stored snapshot, when one was stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn is_changed(&self) -> bool {
        self.outcome == CheckOutcome::Changed
    }

    pub fn failed_deliveries(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.deliveries.iter().filter(|d| !d.is_delivered())
    }
}

/// Runtime metadata kept per site between checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStatus {
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CheckOutcome>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub degraded: bool,
}

impl SiteStatus {
    /// Fold a finished check into the status.
    ///
    /// Returns `true` when this check moved the site into the degraded state.
    pub fn record(
        &mut self,
        outcome: &CheckOutcome,
        completed_at: DateTime<Utc>,
        failure_threshold: u32,
    ) -> bool {
        let was_degraded = self.degraded;
        self.last_checked_at = Some(completed_at);

        if outcome.is_failure() {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.degraded = self.consecutive_failures >= failure_threshold;
        } else if outcome.is_success() {
            self.consecutive_failures = 0;
            self.degraded = false;
        }

        if *outcome == CheckOutcome::Changed {
            self.last_changed_at = Some(completed_at);
        }
        self.last_outcome = Some(outcome.clone());

        self.degraded && !was_degraded
    }

    /// Next time the site is due, measured from the last completion.
    ///
    /// `None` when the site was never checked. A due time past the calendar's
    /// end saturates to `DateTime::MAX_UTC`, which never comes.
    pub fn next_due(&self, interval: Duration) -> Option<DateTime<Utc>> {
        let at = self.last_checked_at?;
        let due = chrono::Duration::from_std(interval)
            .ok()
            .and_then(|interval| at.checked_add_signed(interval));
        Some(due.unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Signed distance from the due time to `now`; negative when not yet due.
    ///
    /// A site that was never checked is treated as due since the epoch.
    pub fn lateness(&self, interval: Duration, now: DateTime<Utc>) -> chrono::Duration {
        match self.next_due(interval) {
            Some(due) => now - due,
            None => now - DateTime::<Utc>::default(),
        }
    }

}
