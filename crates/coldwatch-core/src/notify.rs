//! Notification sinks.
//!
//! Reconciliation hands every surfaced transition to a [`NotificationSink`]:
//! `notify` for offline and alarm-entry messages, `clear` when an alarm ends.
//! Delivery is best effort; a failing sink is logged and never affects
//! polling.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coldwatch_types::UnitIdentity;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Delivers user-facing notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Show `message` for `unit`.
    async fn notify(&self, unit: &UnitIdentity, message: &str) -> Result<()>;

    /// Withdraw an outstanding alarm notification for `unit`.
    async fn clear(&self, unit: &UnitIdentity) -> Result<()>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, unit: &UnitIdentity, message: &str) -> Result<()> {
        warn!(unit_id = unit.id, unit = %unit, "{}", message);
        Ok(())
    }

    async fn clear(&self, unit: &UnitIdentity) -> Result<()> {
        info!(unit_id = unit.id, unit = %unit, "Alarm cleared on unit {}", unit);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    unit_id: u64,
    display_id: &'a str,
    message: Option<&'a str>,
    timestamp: String,
}

/// POSTs notifications as JSON to a webhook.
///
/// Body: `{"event": "notify"|"clear", "unit_id", "display_id", "message",
/// "timestamp"}`.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Default bound on a webhook request.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a sink posting to `url`.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .user_agent(concat!("coldwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Self::with_client(client, url))
    }

    /// Create a sink around an existing client.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn post(&self, payload: WebhookPayload<'_>) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Notification(format!(
                "webhook returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, unit: &UnitIdentity, message: &str) -> Result<()> {
        self.post(WebhookPayload {
            event: "notify",
            unit_id: unit.id,
            display_id: &unit.display_id,
            message: Some(message),
            timestamp: now_rfc3339(),
        })
        .await
    }

    async fn clear(&self, unit: &UnitIdentity) -> Result<()> {
        self.post(WebhookPayload {
            event: "clear",
            unit_id: unit.id,
            display_id: &unit.display_id,
            message: None,
            timestamp: now_rfc3339(),
        })
        .await
    }
}

/// Delivers to several sinks.
///
/// Every sink is tried even when an earlier one fails; the first error is
/// returned.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutSink {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// True when there are no sinks.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(&self, unit: &UnitIdentity, message: &str) -> Result<()> {
        let results =
            futures::future::join_all(self.sinks.iter().map(|s| s.notify(unit, message))).await;
        results.into_iter().collect()
    }

    async fn clear(&self, unit: &UnitIdentity) -> Result<()> {
        let results = futures::future::join_all(self.sinks.iter().map(|s| s.clear(unit))).await;
        results.into_iter().collect()
    }
}

/// A call received by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    /// `notify(unit, message)`.
    Notify { unit: UnitIdentity, message: String },
    /// `clear(unit)`.
    Clear { unit: UnitIdentity },
}

/// Records calls for inspection, optionally failing them.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    fail: AtomicBool,
}

impl RecordingSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail after being recorded.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Messages passed to `notify`, in order.
    pub fn messages(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Notify { message, .. } => Some(message),
                SinkCall::Clear { .. } => None,
            })
            .collect()
    }

    /// Number of `clear` calls.
    pub fn clear_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SinkCall::Clear { .. }))
            .count()
    }

    fn record(&self, call: SinkCall) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
        if self.fail.load(Ordering::Relaxed) {
            return Err(Error::Notification("recording sink set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, unit: &UnitIdentity, message: &str) -> Result<()> {
        self.record(SinkCall::Notify {
            unit: unit.clone(),
            message: message.to_string(),
        })
    }

    async fn clear(&self, unit: &UnitIdentity) -> Result<()> {
        self.record(SinkCall::Clear { unit: unit.clone() })
    }
}
