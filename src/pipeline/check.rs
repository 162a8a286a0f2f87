// src/pipeline/check.rs

//! Single-site check: fetch → extract → diff → persist → notify.
//!
//! The new snapshot is stored before anyone is notified. When storing fails
//! the check ends with a store error, nothing is sent, and the previous
//! snapshot stays the baseline so the next successful check reports the
//! change again.

use std::sync::Arc;

use crate::error::{AppError, ErrorKind, Result};
use crate::models::{CheckOutcome, DeliveryResult, NotifyTarget, Site, Snapshot};
use crate::pipeline::diff::{ChangeReport, DiffSubject, diff};
use crate::pipeline::extract::{ContentExtractor, IgnoreSet};
use crate::services::{Fetcher, Notifier, RetryPolicy, fetch_with_retry};
use crate::storage::SnapshotStore;

/// How a check treats the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// Diff against the baseline and notify on change
    #[default]
    Normal,
    /// Store the fetched content as the new baseline without diffing
    ResetBaseline,
}

/// What one run of the check procedure produced.
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub outcome: CheckOutcome,
    pub report: Option<ChangeReport>,
    pub deliveries: Vec<DeliveryResult>,
    /// Sequence of the snapshot stored by this run
    pub sequence: Option<u64>,
}

impl CheckRun {
    fn failed(outcome: CheckOutcome) -> Self {
        Self {
            outcome,
            report: None,
            deliveries: Vec::new(),
            sequence: None,
        }
    }
}

/// Runs the check procedure for one site at a time.
///
/// Holds no per-site state; callers serialize checks of the same site.
#[derive(Clone)]
pub struct SiteChecker {
    fetcher: Arc<dyn Fetcher>,
    extractor: ContentExtractor,
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<Notifier>,
    retry: RetryPolicy,
    default_targets: Vec<NotifyTarget>,
}

impl SiteChecker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: ContentExtractor,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            store,
            notifier,
            retry,
            default_targets: Vec::new(),
        }
    }

    /// Targets used for sites that list none.
    pub fn with_default_targets(mut self, targets: Vec<NotifyTarget>) -> Self {
        self.default_targets = targets;
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn default_targets(&self) -> &[NotifyTarget] {
        &self.default_targets
    }

    /// Fetch and normalize the site's current content.
    async fn capture(&self, site: &Site) -> Result<String> {
        let response = fetch_with_retry(self.fetcher.as_ref(), &site.url, &self.retry).await?;
        let ignore = IgnoreSet::compile(&site.ignore_patterns)?;
        self.extractor
            .extract(&response.body, site.selector.as_deref(), &ignore)
    }

    /// Run one check of `site`.
    pub async fn run(&self, site: &Site, mode: CheckMode) -> CheckRun {
        log::debug!("{}: checking {}", site.key, site.url);

        let content = match self.capture(site).await {
            Ok(content) => content,
            Err(e) => return CheckRun::failed(failure(site, "capturing content", &e)),
        };

        if mode == CheckMode::ResetBaseline {
            return match self.store.put(&site.key, Snapshot::capture(content)).await {
                Ok(stored) => {
                    log::info!("{}: baseline reset (snapshot #{})", site.key, stored.sequence);
                    CheckRun {
                        sequence: Some(stored.sequence),
                        ..CheckRun::failed(CheckOutcome::Baseline)
                    }
                }
                Err(e) => CheckRun::failed(failure(site, "storing baseline", &e)),
            };
        }

        let previous = match self.store.get(&site.key).await {
            Ok(previous) => previous,
            Err(e) => return CheckRun::failed(failure(site, "reading snapshot", &e)),
        };

        let verdict = diff(
            previous.as_ref(),
            &content,
            DiffSubject {
                site_name: site.display_name(),
                url: &site.url,
            },
        );

        let stored = match self.store.put(&site.key, Snapshot::capture(content)).await {
            Ok(stored) => stored,
            Err(e) => {
                return CheckRun {
                    report: verdict.report,
                    ..CheckRun::failed(failure(site, "storing snapshot", &e))
                };
            }
        };

        let (outcome, report) = match (previous, verdict.report) {
            (None, _) => {
                log::info!("{}: baseline captured (snapshot #{})", site.key, stored.sequence);
                (CheckOutcome::Baseline, None)
            }
            (Some(_), Some(report)) if verdict.changed => {
                log::info!("{}: changed: {}", site.key, report.summary());
                (CheckOutcome::Changed, Some(report))
            }
            (Some(_), _) => {
                log::debug!("{}: unchanged", site.key);
                (CheckOutcome::Unchanged, None)
            }
        };

        let mut deliveries = Vec::new();
        if let Some(report) = &report {
            if let Err(e) = self.store.put_last_diff(&site.key, report).await {
                log::warn!("{}: saving last diff failed: {e}", site.key);
            }
            let targets = site.targets_or(&self.default_targets);
            deliveries = self.notifier.notify(site, report, targets).await;
        }

        CheckRun {
            outcome,
            report,
            deliveries,
            sequence: Some(stored.sequence),
        }
    }
}

/// Log a failed check stage and map its error onto the outcome it stands for.
fn failure(site: &Site, stage: &str, error: &AppError) -> CheckOutcome {
    let message = error.to_string();
    match error.kind() {
        ErrorKind::Fetch => {
            log::warn!("{}: {stage} failed: {message}", site.key);
            CheckOutcome::FetchError(message)
        }
        ErrorKind::Store => {
            log::error!("{}: {stage} failed: {message}", site.key);
            CheckOutcome::StoreError(message)
        }
        ErrorKind::Extract | ErrorKind::Config | ErrorKind::Delivery | ErrorKind::Other => {
            log::warn!("{}: {stage} failed: {message}", site.key);
            CheckOutcome::ExtractError(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::models::TransportKind;
    use crate::services::HtmlSelectorEngine;
    use crate::storage::{LocalSnapshotStore, MemorySnapshotStore};
    use crate::testing::{FailingStore, RecordingTransport, ScriptedFetcher};

    struct Harness {
        fetcher: Arc<ScriptedFetcher>,
        store: Arc<dyn SnapshotStore>,
        desktop: Arc<RecordingTransport>,
        log: Arc<RecordingTransport>,
        checker: SiteChecker,
    }

    fn harness_with_store(store: Arc<dyn SnapshotStore>) -> Harness {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let desktop = Arc::new(RecordingTransport::new(TransportKind::Desktop));
        let log = Arc::new(RecordingTransport::new(TransportKind::Log));
        let notifier = Notifier::new()
            .with_transport(desktop.clone())
            .with_transport(log.clone());
        let checker = SiteChecker::new(
            fetcher.clone(),
            ContentExtractor::new(Arc::new(HtmlSelectorEngine::new())),
            store.clone(),
            Arc::new(notifier),
            RetryPolicy {
                attempts: 1,
                timeout: Duration::from_millis(100),
                delay: Duration::ZERO,
            },
        )
        .with_default_targets(vec![NotifyTarget::Desktop, NotifyTarget::Log]);

        Harness {
            fetcher,
            store,
            desktop,
            log,
            checker,
        }
    }

    fn harness() -> Harness {
        harness_with_store(Arc::new(MemorySnapshotStore::new()))
    }

    fn site() -> Site {
        Site::new("https://shop.example.com/item").unwrap()
    }

    #[tokio::test]
    async fn test_first_check_is_baseline_without_notification() {
        let h = harness();
        h.fetcher.push_ok("<p>Price: $10</p>");

        let run = h.checker.run(&site(), CheckMode::Normal).await;
        assert_eq!(run.outcome, CheckOutcome::Baseline);
        assert_eq!(run.sequence, Some(1));
        assert!(run.deliveries.is_empty());
        assert!(h.desktop.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_content_sends_nothing() {
        let h = harness();
        h.fetcher.push_ok("<p>Price: $10</p>");
        h.fetcher.push_ok("<p>Price:   $10</p>");

        h.checker.run(&site(), CheckMode::Normal).await;
        let run = h.checker.run(&site(), CheckMode::Normal).await;

        assert_eq!(run.outcome, CheckOutcome::Unchanged);
        assert!(run.report.is_none());
        assert_eq!(run.sequence, Some(2));
        assert!(h.desktop.sent().is_empty());
    }

    #[tokio::test]
    async fn test_change_notifies_every_target_once() {
        let h = harness();
        h.fetcher.push_ok("<p>Price: $10</p>");
        h.fetcher.push_ok("<p>Price: $12</p>");

        h.checker.run(&site(), CheckMode::Normal).await;
        let run = h.checker.run(&site(), CheckMode::Normal).await;

        assert_eq!(run.outcome, CheckOutcome::Changed);
        let report = run.report.unwrap();
        assert_eq!(report.edits.len(), 1);
        assert_eq!(report.edits[0].kind, crate::pipeline::EditKind::Replace);

        assert_eq!(run.deliveries.len(), 2);
        assert!(run.deliveries.iter().all(|d| d.is_delivered()));
        assert_eq!(h.desktop.sent().len(), 1);
        assert_eq!(h.log.sent().len(), 1);

        let saved = h.store.last_diff(&site().key).await.unwrap();
        assert_eq!(saved, Some(report));
    }

    #[tokio::test]
    async fn test_site_targets_override_defaults() {
        let h = harness();
        let mut site = site();
        site.targets = vec![NotifyTarget::Log];
        h.fetcher.push_ok("<p>a</p>");
        h.fetcher.push_ok("<p>b</p>");

        h.checker.run(&site, CheckMode::Normal).await;
        let run = h.checker.run(&site, CheckMode::Normal).await;

        assert_eq!(run.deliveries.len(), 1);
        assert!(h.desktop.sent().is_empty());
        assert_eq!(h.log.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_ignored_timestamp_is_not_a_change() {
        let h = harness();
        let mut site = site();
        site.ignore_patterns = vec![r"\d{2}:\d{2}:\d{2}".into()];
        h.fetcher.push_ok("<p>Updated 10:00:00 — OK</p>");
        h.fetcher.push_ok("<p>Updated 10:00:05 — OK</p>");

        h.checker.run(&site, CheckMode::Normal).await;
        let run = h.checker.run(&site, CheckMode::Normal).await;

        assert_eq!(run.outcome, CheckOutcome::Unchanged);
        let stored = h.store.get(&site.key).await.unwrap().unwrap();
        assert_eq!(stored.content, "Updated  — OK");
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_baseline() {
        let h = harness();
        h.fetcher.push_ok("<p>a</p>");
        h.fetcher.push_status(500, "oops");

        h.checker.run(&site(), CheckMode::Normal).await;
        let run = h.checker.run(&site(), CheckMode::Normal).await;

        assert!(matches!(run.outcome, CheckOutcome::FetchError(_)));
        assert!(run.sequence.is_none());
        assert_eq!(h.store.get(&site().key).await.unwrap().unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_outcome_follows_error_class() {
        let h = harness();
        h.fetcher.push_error("connection reset");
        let run = h.checker.run(&site(), CheckMode::Normal).await;
        assert!(matches!(run.outcome, CheckOutcome::FetchError(_)));

        let mut bad_pattern = site();
        bad_pattern.ignore_patterns = vec!["(".into()];
        h.fetcher.push_ok("<p>a</p>");
        let run = h.checker.run(&bad_pattern, CheckMode::Normal).await;
        assert!(matches!(run.outcome, CheckOutcome::ExtractError(ref m) if m.contains("pattern")));

        let mut bad_selector = site();
        bad_selector.selector = Some("((".into());
        h.fetcher.push_ok("<p>a</p>");
        let run = h.checker.run(&bad_selector, CheckMode::Normal).await;
        assert!(matches!(run.outcome, CheckOutcome::ExtractError(ref m) if m.contains("selector")));

        assert!(h.store.get(&site().key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_binary_content_is_extract_error() {
        let h = harness();
        h.fetcher.push_ok("PK\0\u{3}\u{4}");

        let run = h.checker.run(&site(), CheckMode::Normal).await;
        assert!(matches!(run.outcome, CheckOutcome::ExtractError(_)));
    }

    #[tokio::test]
    async fn test_store_failure_suppresses_notification_until_stored() {
        let failing = Arc::new(FailingStore::new());
        let h = harness_with_store(failing.clone());
        h.fetcher.push_ok("<p>Price: $10</p>");
        h.fetcher.push_ok("<p>Price: $12</p>");
        h.fetcher.push_ok("<p>Price: $12</p>");

        h.checker.run(&site(), CheckMode::Normal).await;

        failing.fail_writes(true);
        let run = h.checker.run(&site(), CheckMode::Normal).await;
        assert!(matches!(run.outcome, CheckOutcome::StoreError(_)));
        assert!(run.report.is_some());
        assert!(h.desktop.sent().is_empty());

        failing.fail_writes(false);
        let run = h.checker.run(&site(), CheckMode::Normal).await;
        assert_eq!(run.outcome, CheckOutcome::Changed);
        assert_eq!(h.desktop.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_baseline_skips_diff() {
        let h = harness();
        h.fetcher.push_ok("<p>old</p>");
        h.fetcher.push_ok("<p>new</p>");
        h.fetcher.push_ok("<p>new</p>");

        h.checker.run(&site(), CheckMode::Normal).await;
        let reset = h.checker.run(&site(), CheckMode::ResetBaseline).await;
        assert_eq!(reset.outcome, CheckOutcome::Baseline);
        assert_eq!(reset.sequence, Some(2));

        let run = h.checker.run(&site(), CheckMode::Normal).await;
        assert_eq!(run.outcome, CheckOutcome::Unchanged);
        assert!(h.desktop.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reset_recovers_from_corrupt_snapshot() {
        let tmp = tempfile::TempDir::new().unwrap();
        let h = harness_with_store(Arc::new(LocalSnapshotStore::new(tmp.path())));
        let site = site();
        h.fetcher.set_default_body("<p>Price: $10</p>");

        h.checker.run(&site, CheckMode::Normal).await;
        let snapshot_file = tmp
            .path()
            .join("sites")
            .join(site.key.as_str())
            .join("snapshot.json");
        std::fs::write(&snapshot_file, b"{ trunc").unwrap();

        let run = h.checker.run(&site, CheckMode::Normal).await;
        assert!(matches!(run.outcome, CheckOutcome::StoreError(_)));

        let reset = h.checker.run(&site, CheckMode::ResetBaseline).await;
        assert_eq!(reset.outcome, CheckOutcome::Baseline);
        assert_eq!(reset.sequence, Some(2));

        let run = h.checker.run(&site, CheckMode::Normal).await;
        assert_eq!(run.outcome, CheckOutcome::Unchanged);
        assert_eq!(run.sequence, Some(3));
        assert!(h.desktop.sent().is_empty());
    }

    #[tokio::test]
    async fn test_selector_breakage_is_reported_as_change() {
        let h = harness();
        let mut site = site();
        site.selector = Some("#price".into());
        h.fetcher.push_ok(r#"<p id="price">Price: $10</p>"#);
        h.fetcher.push_ok(r#"<p class="price">Price: $10</p>"#);

        h.checker.run(&site, CheckMode::Normal).await;
        let run = h.checker.run(&site, CheckMode::Normal).await;
        assert_eq!(run.outcome, CheckOutcome::Changed);
    }
}
