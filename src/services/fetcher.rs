// src/services/fetcher.rs

//! Page fetching.
//!
//! `Fetcher` is the transport seam; `fetch_with_retry` layers the retry and
//! timeout policy on top so every implementation gets the same bounds.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::FetchConfig;
use crate::utils::http;

/// Raw response from a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: String,
    pub status: u16,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            status: 200,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches remote content.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse>;
}

/// HTTP fetcher backed by `reqwest`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                AppError::Timeout {
                    url: url.to_string(),
                    secs: timeout.as_secs(),
                }
            } else {
                AppError::fetch(url, e)
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        Ok(FetchResponse { body, status })
    }
}

/// Attempt count, per-attempt timeout and pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub delay: Duration,
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            attempts: config.retry_count.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Fetch `url`, retrying failed attempts and non-success statuses.
///
/// Each attempt is bounded by `policy.timeout` regardless of whether the
/// fetcher honours the timeout it is given.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    policy: &RetryPolicy,
) -> Result<FetchResponse> {
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(policy.timeout, fetcher.fetch(url, policy.timeout))
            .await
        {
            Ok(Ok(response)) if response.is_success() => return Ok(response),
            Ok(Ok(response)) => AppError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            },
            Ok(Err(e)) => e,
            Err(_) => AppError::Timeout {
                url: url.to_string(),
                secs: policy.timeout.as_secs(),
            },
        };

        if attempt < attempts {
            log::warn!("Fetch attempt {attempt}/{attempts} for {url} failed: {result}. Retrying...");
            if !policy.delay.is_zero() {
                tokio::time::sleep(policy.delay).await;
            }
        }
        last_error = Some(result);
    }

    Err(last_error.unwrap_or_else(|| AppError::fetch(url, "no attempts made")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFetcher;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            timeout: Duration::from_millis(50),
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push_error("connection reset");
        fetcher.push_status(503, "busy");
        fetcher.push_ok("hello");

        let response = fetch_with_retry(&fetcher, "https://example.com", &policy(3))
            .await
            .unwrap();
        assert_eq!(response.body, "hello");
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push_status(500, "oops");
        fetcher.push_status(502, "oops");

        let err = fetch_with_retry(&fetcher, "https://example.com", &policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 502, .. }));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_hanging_fetch_times_out() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push_hang();

        let err = fetch_with_retry(&fetcher, "https://example.com", &policy(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout { .. }));
    }
}
