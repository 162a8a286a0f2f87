//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{NotifyTarget, SiteKey, SiteStatus, Snapshot, TransportKind};
use crate::pipeline::{ChangeReport, DiffSubject, diff};
use crate::services::{FetchResponse, Fetcher, Message, Transport};
use crate::storage::{MemorySnapshotStore, SnapshotStore};

/// Build a change report between two texts.
pub(crate) fn report_for(old: &str, new: &str) -> ChangeReport {
    let mut previous = Snapshot::capture(old);
    previous.sequence = 1;
    diff(
        Some(&previous),
        new,
        DiffSubject {
            site_name: "Shop",
            url: "https://shop.example.com",
        },
    )
    .report
    .expect("texts differ")
}

enum Step {
    Respond(FetchResponse),
    Fail(String),
    Hang,
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    default_body: Option<String>,
    latency: Duration,
    blocking: Duration,
}

/// Fetcher that replays queued responses, then falls back to a default body.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    script: Mutex<Script>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, step: Step) {
        self.script().steps.push_back(step);
    }

    pub(crate) fn push_ok(&self, body: &str) {
        self.push(Step::Respond(FetchResponse::ok(body)));
    }

    pub(crate) fn push_status(&self, status: u16, body: &str) {
        self.push(Step::Respond(FetchResponse {
            body: body.to_string(),
            status,
        }));
    }

    pub(crate) fn push_error(&self, message: &str) {
        self.push(Step::Fail(message.to_string()));
    }

    pub(crate) fn push_hang(&self) {
        self.push(Step::Hang);
    }

    /// Body served once the queue is empty.
    pub(crate) fn set_default_body(&self, body: &str) {
        self.script().default_body = Some(body.to_string());
    }

    /// Delay applied to every fetch.
    pub(crate) fn set_latency(&self, latency: Duration) {
        self.script().latency = latency;
    }

    /// Time every fetch spends blocking its worker thread.
    pub(crate) fn set_blocking(&self, blocking: Duration) {
        self.script().blocking = blocking;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most fetches ever running at the same time.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let (step, latency, blocking) = {
            let mut script = self.script();
            let step = script.steps.pop_front().or_else(|| {
                script
                    .default_body
                    .as_deref()
                    .map(|body| Step::Respond(FetchResponse::ok(body)))
            });
            (step, script.latency, script.blocking)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !blocking.is_zero() {
            std::thread::sleep(blocking);
        }

        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(AppError::fetch(url, message)),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(AppError::fetch(url, "no scripted response")),
        }
    }
}

/// Transport that records every message it accepts.
pub(crate) struct RecordingTransport {
    kind: TransportKind,
    delay: Duration,
    sent: Mutex<Vec<(NotifyTarget, Message)>>,
}

impl RecordingTransport {
    pub(crate) fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn sent(&self) -> Vec<(NotifyTarget, Message)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, target: &NotifyTarget, message: &Message) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target.clone(), message.clone()));
        Ok(())
    }
}

/// Transport that always fails.
pub(crate) struct FailingTransport {
    kind: TransportKind,
}

impl FailingTransport {
    pub(crate) fn new(kind: TransportKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Transport for FailingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, _target: &NotifyTarget, _message: &Message) -> Result<()> {
        Err(AppError::delivery(self.kind.as_str(), "connection refused"))
    }
}

/// In-memory store whose writes can be switched to fail.
#[derive(Default)]
pub(crate) struct FailingStore {
    inner: MemorySnapshotStore,
    fail: AtomicBool,
}

impl FailingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self, key: &SiteKey) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::store(key.as_str(), "disk full"));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FailingStore {
    async fn get(&self, key: &SiteKey) -> Result<Option<Snapshot>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &SiteKey, snapshot: Snapshot) -> Result<Snapshot> {
        self.check(key)?;
        self.inner.put(key, snapshot).await
    }

    async fn remove(&self, key: &SiteKey) -> Result<()> {
        self.check(key)?;
        self.inner.remove(key).await
    }

    async fn last_diff(&self, key: &SiteKey) -> Result<Option<ChangeReport>> {
        self.inner.last_diff(key).await
    }

    async fn put_last_diff(&self, key: &SiteKey, report: &ChangeReport) -> Result<()> {
        self.check(key)?;
        self.inner.put_last_diff(key, report).await
    }

    async fn status(&self, key: &SiteKey) -> Result<Option<SiteStatus>> {
        self.inner.status(key).await
    }

    async fn put_status(&self, key: &SiteKey, status: &SiteStatus) -> Result<()> {
        self.check(key)?;
        self.inner.put_status(key, status).await
    }
}
