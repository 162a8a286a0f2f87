// src/services/transports.rs

//! Notification transports.
//!
//! One `Transport` per channel. A transport only reports whether the alert
//! was handed off; retries and fan-out belong to the dispatcher.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::models::{DesktopConfig, EmailConfig, NotifyTarget, Site, TransportKind, WebhookConfig};
use crate::pipeline::ChangeReport;
use crate::utils::truncate;

/// Longest diff excerpt included in a message body.
const MAX_EXCERPT_CHARS: usize = 4000;
/// Desktop popups only show a few lines.
const MAX_DESKTOP_CHARS: usize = 200;

/// Alert content shared by every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Message {
    /// Alert for a detected change.
    pub fn for_change(site: &Site, report: &ChangeReport) -> Self {
        let excerpt = truncate(&report.to_text(), MAX_EXCERPT_CHARS);
        Self {
            subject: format!("Website changed: {}", site.display_name()),
            body: format!(
                "{}\n{}\nDetected at {}\n\n{}",
                site.url,
                report.summary(),
                report.detected_at.format("%Y-%m-%d %H:%M:%S UTC"),
                excerpt
            ),
            site: Some(site.key.to_string()),
            url: Some(site.url.clone()),
        }
    }

    /// Fixed message used to verify transport setup.
    pub fn test() -> Self {
        Self {
            subject: "sitewatch test notification".to_string(),
            body: format!(
                "This is a test notification sent at {}.\n\
                 If you can read this, the transport is configured correctly.",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ),
            site: None,
            url: None,
        }
    }
}

/// Delivers messages over one channel.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn send(&self, target: &NotifyTarget, message: &Message) -> Result<()>;
}

fn mismatch(kind: TransportKind, target: &NotifyTarget) -> AppError {
    AppError::delivery(kind.as_str(), format!("cannot deliver to target '{target}'"))
}

/// Run a command to completion, turning a non-zero exit into a delivery error.
async fn run_command(kind: TransportKind, program: &str, args: &[String]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::delivery(kind.as_str(), format!("{program}: {e}")))?;

    if !output.status.success() {
        return Err(AppError::delivery(
            kind.as_str(),
            format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Desktop
// ---------------------------------------------------------------------------

/// Desktop popup through the platform notifier command.
#[derive(Debug, Clone)]
pub struct DesktopTransport {
    enabled: bool,
}

impl DesktopTransport {
    pub fn new(config: &DesktopConfig) -> Self {
        Self {
            enabled: config.enabled,
        }
    }
}

fn applescript_quote(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Program and arguments that show a notification on this platform.
pub fn desktop_command(title: &str, body: &str) -> Option<(String, Vec<String>)> {
    let body = truncate(body, MAX_DESKTOP_CHARS);
    if cfg!(target_os = "macos") {
        Some((
            "osascript".to_string(),
            vec![
                "-e".to_string(),
                format!(
                    "display notification {} with title {}",
                    applescript_quote(&body),
                    applescript_quote(title)
                ),
            ],
        ))
    } else if cfg!(target_os = "linux") {
        Some((
            "notify-send".to_string(),
            vec!["--app-name=sitewatch".to_string(), title.to_string(), body],
        ))
    } else {
        None
    }
}

#[async_trait]
impl Transport for DesktopTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Desktop
    }

    async fn send(&self, target: &NotifyTarget, message: &Message) -> Result<()> {
        if !matches!(target, NotifyTarget::Desktop) {
            return Err(mismatch(self.kind(), target));
        }
        if !self.enabled {
            return Err(AppError::delivery("desktop", "disabled in configuration"));
        }

        let (program, args) = desktop_command(&message.subject, &message.body).ok_or_else(|| {
            AppError::delivery("desktop", "no notifier available on this platform")
        })?;
        run_command(self.kind(), &program, &args).await
    }
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

/// Email handed to a local sendmail-compatible binary.
#[derive(Debug, Clone)]
pub struct EmailTransport {
    enabled: bool,
    sendmail_path: String,
    from: String,
}

impl EmailTransport {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            enabled: config.enabled,
            sendmail_path: config.sendmail_path.clone(),
            from: config.from.clone(),
        }
    }
}

fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 5322 message text for sendmail.
pub fn compose_email(from: &str, to: &[String], subject: &str, body: &str) -> String {
    let mut mail = String::new();
    mail.push_str(&format!("From: {}\r\n", header_value(from)));
    mail.push_str(&format!("To: {}\r\n", header_value(&to.join(", "))));
    mail.push_str(&format!("Subject: {}\r\n", header_value(subject)));
    mail.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
    mail.push_str("MIME-Version: 1.0\r\n");
    mail.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    mail.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
    for line in body.lines() {
        mail.push_str(line);
        mail.push_str("\r\n");
    }
    mail
}

#[async_trait]
impl Transport for EmailTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Email
    }

    async fn send(&self, target: &NotifyTarget, message: &Message) -> Result<()> {
        let NotifyTarget::Email { to } = target else {
            return Err(mismatch(self.kind(), target));
        };
        if !self.enabled {
            return Err(AppError::delivery("email", "disabled in configuration"));
        }

        let mail = compose_email(&self.from, to, &message.subject, &message.body);
        let err = |e: std::io::Error| AppError::delivery("email", format!("{}: {e}", self.sendmail_path));

        let mut child = Command::new(&self.sendmail_path)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(err)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(mail.as_bytes()).await.map_err(err)?;
            stdin.shutdown().await.map_err(err)?;
        }

        let output = child.wait_with_output().await.map_err(err)?;
        if !output.status.success() {
            return Err(AppError::delivery(
                "email",
                format!(
                    "sendmail exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        log::debug!("Email sent to {}", to.join(", "));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    message: &'a Message,
    sent_at: String,
}

/// JSON POST to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: Client,
    timeout: Duration,
}

impl WebhookTransport {
    pub fn new(config: &WebhookConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &WebhookConfig) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Webhook
    }

    async fn send(&self, target: &NotifyTarget, message: &Message) -> Result<()> {
        let NotifyTarget::Webhook { url } = target else {
            return Err(mismatch(self.kind(), target));
        };

        let payload = WebhookPayload {
            message,
            sent_at: Utc::now().to_rfc3339(),
        };

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::delivery("webhook", e))?;

        if !response.status().is_success() {
            return Err(AppError::delivery(
                "webhook",
                format!("{url} answered {}", response.status()),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

/// Writes alerts to the application log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Log
    }

    async fn send(&self, target: &NotifyTarget, message: &Message) -> Result<()> {
        if !matches!(target, NotifyTarget::Log) {
            return Err(mismatch(self.kind(), target));
        }
        log::info!("[notify] {}\n{}", message.subject, message.body);
        Ok(())
    }
}
