// src/scheduler/mod.rs

//! Monitor engine.
//!
//! `Monitor` owns the registry, the check procedure and the per-site runtime
//! status, and is the single entry point for the CLI and the daemon:
//!
//! - `check_all` / `check_one`: explicit checks (wait for an in-flight check
//!   of the same site instead of running alongside it)
//! - `run_daemon`: the scheduling loop (skips sites already in flight)
//! - `add_site` / `remove_site` / `update_site` / `list_sites`: registry ops
//!
//! At most `max_concurrent` checks run at once across all callers, and
//! checks of one site never overlap.

pub mod queue;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{
    CheckResult, Config, DeliveryResult, MonitorConfig, NotifyTarget, Site, SiteKey, SiteStatus,
};
use crate::pipeline::{ChangeReport, CheckMode, ContentExtractor, SiteChecker};
use crate::registry::SiteRegistry;
use crate::services::{HtmlSelectorEngine, HttpFetcher, Notifier, RetryPolicy};
use crate::storage::{LocalSnapshotStore, SnapshotStore, TomlConfigStore};
use crate::utils::keyed_lock::KeyedLocks;

pub use queue::PendingQueue;

/// The change-monitoring engine.
pub struct Monitor {
    registry: Arc<SiteRegistry>,
    checker: SiteChecker,
    settings: MonitorConfig,
    statuses: Mutex<HashMap<SiteKey, SiteStatus>>,
    flights: KeyedLocks<SiteKey>,
    permits: Semaphore,
}

impl Monitor {
    pub fn new(registry: Arc<SiteRegistry>, checker: SiteChecker, settings: MonitorConfig) -> Self {
        let permits = Semaphore::new(settings.max_concurrent.max(1));
        Self {
            registry,
            checker,
            settings,
            statuses: Mutex::new(HashMap::new()),
            flights: KeyedLocks::new(),
            permits,
        }
    }

    /// Build the production engine from a config file.
    ///
    /// Snapshots live in `monitor.data_dir` relative to the config file and
    /// registry changes are written back to the same file.
    pub fn open(config_path: &Path) -> Result<Self> {
        let config = Config::load(config_path)?;
        config.validate()?;

        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let store = Arc::new(LocalSnapshotStore::new(config.data_dir(base)));
        let registry = Arc::new(SiteRegistry::with_store(Arc::new(TomlConfigStore::new(
            config_path,
        )))?);

        let checker = SiteChecker::new(
            Arc::new(HttpFetcher::new(&config.fetch)?),
            ContentExtractor::new(Arc::new(HtmlSelectorEngine::new())),
            store,
            Arc::new(Notifier::from_config(&config.notify)),
            RetryPolicy::from(&config.fetch),
        )
        .with_default_targets(config.notify.default_targets.clone());

        Ok(Self::new(registry, checker, config.monitor))
    }

    pub fn registry(&self) -> &Arc<SiteRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &MonitorConfig {
        &self.settings
    }

    fn store(&self) -> &Arc<dyn SnapshotStore> {
        self.checker.store()
    }

    // -----------------------------------------------------------------
    // Runtime status
    // -----------------------------------------------------------------

    /// Current status of a site: memory first, then the store.
    ///
    /// A site with a snapshot but no stored status counts as checked when
    /// the snapshot was captured.
    pub async fn status(&self, key: &SiteKey) -> SiteStatus {
        let cached = self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        if let Some(status) = cached {
            return status;
        }

        let loaded = match self.store().status(key).await {
            Ok(Some(status)) => status,
            Ok(None) => match self.store().get(key).await {
                Ok(Some(snapshot)) => SiteStatus {
                    last_checked_at: Some(snapshot.captured_at),
                    ..SiteStatus::default()
                },
                Ok(None) => SiteStatus::default(),
                Err(e) => {
                    log::warn!("{key}: cannot read snapshot: {e}");
                    SiteStatus::default()
                }
            },
            Err(e) => {
                log::warn!("{key}: cannot read status: {e}");
                SiteStatus::default()
            }
        };

        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert(loaded)
            .clone()
    }

    /// Fold a finished check into the site's status and persist it.
    async fn record(&self, site: &Site, result: &CheckResult) -> SiteStatus {
        let mut status = self.status(&site.key).await;
        let degraded_now = status.record(
            &result.outcome,
            result.checked_at,
            self.settings.failure_threshold,
        );

        if degraded_now {
            log::error!(
                "{}: degraded after {} consecutive failures",
                site.key,
                status.consecutive_failures
            );
        }

        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(site.key.clone(), status.clone());

        if let Err(e) = self.store().put_status(&site.key, &status).await {
            log::warn!("{}: cannot persist status: {e}", site.key);
        }
        status
    }

    // -----------------------------------------------------------------
    // Checks
    // -----------------------------------------------------------------

    /// Run one check while already holding the site's flight guard.
    async fn run_check(&self, site: &Site, mode: CheckMode) -> CheckResult {
        // A closed semaphore only happens at teardown; run unbounded then.
        let _permit = self.permits.acquire().await.ok();

        let run = self.checker.run(site, mode).await;
        let mut result = CheckResult {
            site_key: site.key.clone(),
            outcome: run.outcome,
            report: run.report,
            deliveries: run.deliveries,
            consecutive_failures: 0,
            degraded: false,
            sequence: run.sequence,
            checked_at: Utc::now(),
        };

        let status = self.record(site, &result).await;
        result.consecutive_failures = status.consecutive_failures;
        result.degraded = status.degraded;
        result
    }

    /// Check a site, waiting for any in-flight check of it to finish first.
    async fn check_waiting(&self, site: &Site, mode: CheckMode) -> CheckResult {
        let _flight = self.flights.lock(&site.key).await;
        self.run_check(site, mode).await
    }

    /// Check a site unless a check of it is already running.
    async fn check_if_idle(&self, site: &Site) -> Option<CheckResult> {
        let Some(_flight) = self.flights.try_lock(&site.key) else {
            log::debug!("{}: check already in flight, skipping", site.key);
            return None;
        };
        Some(self.run_check(site, CheckMode::Normal).await)
    }

    fn site(&self, key: &SiteKey) -> Result<Site> {
        self.registry
            .get(key)
            .ok_or_else(|| AppError::SiteNotFound(key.to_string()))
    }

    /// Check one site now, regardless of its interval or enabled flag.
    pub async fn check_one(&self, key: &SiteKey) -> Result<CheckResult> {
        let site = self.site(key)?;
        Ok(self.check_waiting(&site, CheckMode::Normal).await)
    }

    /// Fetch the site and store the result as its new baseline.
    pub async fn reset_baseline(&self, key: &SiteKey) -> Result<CheckResult> {
        let site = self.site(key)?;
        Ok(self.check_waiting(&site, CheckMode::ResetBaseline).await)
    }

    /// Enabled sites ordered most overdue first.
    ///
    /// With `force` every enabled site is included; otherwise only those
    /// whose interval has elapsed at `now`.
    pub async fn pending(&self, now: DateTime<Utc>, force: bool) -> Vec<Site> {
        let mut queue = PendingQueue::new();
        for (order, site) in self.registry.list().into_iter().enumerate() {
            if !site.enabled {
                continue;
            }
            let interval = site.interval(self.settings.default_interval_secs);
            let lateness = self.status(&site.key).await.lateness(interval, now);
            if force || lateness >= chrono::Duration::zero() {
                queue.push(site, lateness, order);
            }
        }
        queue.into_sorted()
    }

    /// Check every enabled site that is due (all of them with `force`).
    ///
    /// Checks are spawned in scheduling order, at most `max_concurrent` at a
    /// time, and results come back in that order.
    pub async fn check_all(self: Arc<Self>, force: bool) -> Vec<CheckResult> {
        let sites = self.pending(Utc::now(), force).await;
        if sites.is_empty() {
            log::info!("No sites due for checking");
            return Vec::new();
        }

        let limit = self.settings.max_concurrent.max(1);
        log::info!("Checking {} site(s) with up to {limit} concurrent", sites.len());

        let mut slots: Vec<Option<CheckResult>> = vec![None; sites.len()];
        let mut queued = sites.into_iter().enumerate();
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < limit {
                let Some((index, site)) = queued.next() else {
                    break;
                };
                let monitor = Arc::clone(&self);
                tasks.spawn(async move {
                    (index, monitor.check_waiting(&site, CheckMode::Normal).await)
                });
            }

            match tasks.join_next().await {
                Some(Ok((index, result))) => slots[index] = Some(result),
                Some(Err(e)) => log::error!("Check task failed: {e}"),
                None => break,
            }
        }

        let results: Vec<CheckResult> = slots.into_iter().flatten().collect();
        let changed = results.iter().filter(|r| r.is_changed()).count();
        let failed = results.iter().filter(|r| r.outcome.is_failure()).count();
        let undelivered: usize = results.iter().map(|r| r.failed_deliveries().count()).sum();
        log::info!(
            "Checked {} site(s): {changed} changed, {failed} failed, {undelivered} notification(s) undelivered",
            results.len()
        );
        results
    }

    /// Most recent change report stored for a site.
    pub async fn get_last_diff(&self, key: &SiteKey) -> Result<Option<ChangeReport>> {
        self.store().last_diff(key).await
    }

    /// Send the test message to the default targets and every site target.
    pub async fn test_notification(&self) -> Vec<DeliveryResult> {
        let mut targets: Vec<NotifyTarget> = Vec::new();
        let site_targets = self.registry.list().into_iter().flat_map(|s| s.targets);
        for target in self.checker.default_targets().iter().cloned().chain(site_targets) {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        self.checker.notifier().send_test(&targets).await
    }

    // -----------------------------------------------------------------
    // Registry operations
    // -----------------------------------------------------------------

    pub fn list_sites(&self) -> Vec<Site> {
        self.registry.list()
    }

    /// Every site with its current status, in registry order.
    pub async fn site_statuses(&self) -> Vec<(Site, SiteStatus)> {
        let mut out = Vec::new();
        for site in self.registry.list() {
            let status = self.status(&site.key).await;
            out.push((site, status));
        }
        out
    }

    pub fn add_site(&self, site: Site) -> Result<Site> {
        self.registry.add(site)
    }

    pub fn update_site<F>(&self, key: &SiteKey, edit: F) -> Result<Site>
    where
        F: FnOnce(&mut Site),
    {
        self.registry.update(key, edit)
    }

    /// Remove a site; with `purge` its stored snapshots go too.
    pub async fn remove_site(&self, key: &SiteKey, purge: bool) -> Result<Site> {
        let removed = self.registry.remove(key)?;

        let _flight = self.flights.lock(key).await;
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if purge {
            self.store().remove(key).await?;
        }
        self.flights.forget(key);
        Ok(removed)
    }

    // -----------------------------------------------------------------
    // Daemon
    // -----------------------------------------------------------------

    /// Earliest time any enabled site not in flight becomes due after `now`.
    async fn next_wake(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut earliest: Option<DateTime<Utc>> = None;
        for site in self.registry.list().into_iter().filter(|s| s.enabled) {
            let interval = site.interval(self.settings.default_interval_secs);
            if let Some(due) = self.status(&site.key).await.next_due(interval) {
                if due > now && earliest.is_none_or(|e| due < e) {
                    earliest = Some(due);
                }
            }
        }
        earliest
    }

    /// Run scheduled checks until `stop` is cancelled.
    ///
    /// Cancellation stops new checks immediately; checks already running are
    /// allowed to finish before this returns.
    pub async fn run_daemon(self: Arc<Self>, stop: CancellationToken) {
        let limit = self.settings.max_concurrent.max(1);
        let max_idle = Duration::from_secs(self.settings.max_idle_secs.max(1));
        let in_flight: Arc<Mutex<HashSet<SiteKey>>> = Arc::default();
        let mut tasks = JoinSet::new();

        log::info!(
            "Daemon started: {} site(s), up to {limit} concurrent checks",
            self.registry.len()
        );

        loop {
            if stop.is_cancelled() {
                break;
            }

            if let Err(e) = self.registry.reload() {
                log::warn!("Registry reload failed, keeping current sites: {e}");
            }

            let now = Utc::now();
            for site in self.pending(now, false).await {
                let running = in_flight.lock().unwrap_or_else(PoisonError::into_inner).len();
                if running >= limit {
                    break;
                }
                if self.flights.is_locked(&site.key) {
                    continue;
                }
                let newly_added = in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(site.key.clone());
                if !newly_added {
                    continue;
                }

                let monitor = Arc::clone(&self);
                let slot = InFlight {
                    set: Arc::clone(&in_flight),
                    key: site.key.clone(),
                };
                tasks.spawn(async move {
                    let _slot = slot;
                    monitor.check_if_idle(&site).await;
                });
            }

            let sleep_for = self
                .next_wake(now)
                .await
                .and_then(|due| (due - Utc::now()).to_std().ok())
                .map_or(max_idle, |d| d.min(max_idle));

            tokio::select! {
                _ = stop.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("Scheduled check task failed: {e}");
                    }
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        if !tasks.is_empty() {
            log::info!("Stop requested; waiting for {} in-flight check(s)", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Scheduled check task failed: {e}");
            }
        }
        log::info!("Daemon stopped");
    }
}

/// Marks a site as running in the daemon until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<SiteKey>>>,
    key: SiteKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
