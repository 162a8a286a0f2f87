// src/services/notifier.rs

//! Notifier dispatcher.
//!
//! Fans one alert out to every target of a site. Each target gets its own
//! `DeliveryResult`; a failing transport never blocks the others. Delivery
//! is attempted once per call and never retried here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::models::{DeliveryResult, NotifyConfig, NotifyTarget, Site, TransportKind};
use crate::pipeline::ChangeReport;
use crate::services::transports::{
    DesktopTransport, EmailTransport, LogTransport, Message, Transport, WebhookTransport,
};

/// Upper bound on a single delivery attempt.
const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Routes messages to the transport registered for each target kind.
#[derive(Clone)]
pub struct Notifier {
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
    delivery_timeout: Duration,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Dispatcher with no transports; every delivery fails until one is added.
    pub fn new() -> Self {
        Self {
            transports: HashMap::new(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// Register (or replace) the transport for its kind.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(transport.kind(), transport);
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Dispatcher with every built-in transport, configured from `config`.
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new()
            .with_transport(Arc::new(DesktopTransport::new(&config.desktop)))
            .with_transport(Arc::new(EmailTransport::new(&config.email)))
            .with_transport(Arc::new(WebhookTransport::new(&config.webhook)))
            .with_transport(Arc::new(LogTransport))
    }

    /// Deliver a change alert for `site` to each of `targets`.
    pub async fn notify(
        &self,
        site: &Site,
        report: &ChangeReport,
        targets: &[NotifyTarget],
    ) -> Vec<DeliveryResult> {
        let message = Message::for_change(site, report);
        let results = self.dispatch(&message, targets).await;

        let failed = results.iter().filter(|r| !r.is_delivered()).count();
        if failed > 0 {
            log::warn!(
                "{}: {failed}/{} notification(s) failed",
                site.key,
                results.len()
            );
        } else {
            log::info!("{}: notified {} target(s)", site.key, results.len());
        }
        results
    }

    /// Send the fixed test message to each of `targets`.
    pub async fn send_test(&self, targets: &[NotifyTarget]) -> Vec<DeliveryResult> {
        self.dispatch(&Message::test(), targets).await
    }

    /// One concurrent attempt per target, results in target order.
    async fn dispatch(&self, message: &Message, targets: &[NotifyTarget]) -> Vec<DeliveryResult> {
        let attempts = targets.iter().map(|target| async move {
            let Some(transport) = self.transports.get(&target.kind()) else {
                return DeliveryResult::failed(
                    target.clone(),
                    format!("no {} transport configured", target.kind()),
                );
            };

            match tokio::time::timeout(self.delivery_timeout, transport.send(target, message)).await
            {
                Ok(Ok(())) => DeliveryResult::delivered(target.clone()),
                Ok(Err(e)) => {
                    log::warn!("Delivery to {target} failed: {e}");
                    DeliveryResult::failed(target.clone(), e.to_string())
                }
                Err(_) => {
                    log::warn!("Delivery to {target} timed out");
                    DeliveryResult::failed(
                        target.clone(),
                        format!("timed out after {}s", self.delivery_timeout.as_secs()),
                    )
                }
            }
        });

        join_all(attempts).await
    }
}
