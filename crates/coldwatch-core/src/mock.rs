//! Scripted transport for testing.
//!
//! [`MockTransport`] implements [`Transport`] without any network access, so
//! probers, schedulers and monitors can be exercised deterministically.
//!
//! # Features
//!
//! - **Scripted replies**: queue outcomes per endpoint path, or per full URL
//!   to tell units apart
//! - **Sticky defaults**: the reply used once a queue runs dry
//! - **Latency simulation**: add an artificial delay to every request
//! - **Panic injection**: make every request panic, for isolation tests
//! - **Call recording**: inspect which URLs were requested and with which key

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coldwatch_types::PollOutcome;

use crate::transport::{DIAG_REFUSED, Transport};

/// A request seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Base URL the request targeted.
    pub base_url: String,
    /// Endpoint path.
    pub path: String,
    /// API key sent, if any.
    pub api_key: Option<String>,
}

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<PollOutcome>,
    default: Option<PollOutcome>,
}

/// A scripted [`Transport`].
///
/// Replies are looked up by full URL (`base_url + path`) first, then by
/// path alone. Without any script the request fails with
/// `Connection refused`.
///
/// # Example
///
/// ```
/// use coldwatch_core::{MockTransport, Transport};
///
/// # async fn example() {
/// let transport = MockTransport::new();
/// transport.script("/api/v1/status", MockTransport::reply(500, "overload"));
/// transport.set_default("/api/v1/status", MockTransport::reply(200, "{}"));
///
/// let first = transport.get("https://unit:8095", "/api/v1/status", None).await;
/// assert_eq!(first.http_status, Some(500));
/// let second = transport.get("https://unit:8095", "/api/v1/status", None).await;
/// assert!(second.reachable);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<MockCall>>,
    latency_ms: AtomicU64,
    panic: AtomicBool,
}

impl MockTransport {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// A completed HTTP exchange.
    pub fn reply(status: u16, body: &str) -> PollOutcome {
        PollOutcome::from_response("", status, body.to_string())
    }

    /// A request that never got an HTTP response.
    pub fn network_failure(diagnostic: &str) -> PollOutcome {
        PollOutcome::transport_failure("", diagnostic)
    }

    /// Queue a one-shot reply for a path or full URL.
    pub fn script(&self, key: &str, outcome: PollOutcome) {
        self.lock_scripts()
            .entry(key.to_string())
            .or_default()
            .queue
            .push_back(outcome);
    }

    /// Set the reply used once the queue for `key` is empty.
    pub fn set_default(&self, key: &str, outcome: PollOutcome) {
        self.lock_scripts().entry(key.to_string()).or_default().default = Some(outcome);
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Make every request panic.
    pub fn set_panic(&self, panic: bool) {
        self.panic.store(panic, Ordering::Relaxed);
    }

    /// All requests made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests whose URL starts with `base_url`.
    pub fn call_count_for(&self, base_url: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.base_url == base_url)
            .count()
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, HashMap<String, Script>> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, url: &str, path: &str) -> PollOutcome {
        let mut scripts = self.lock_scripts();
        for key in [url, path] {
            if let Some(script) = scripts.get_mut(key) {
                if let Some(outcome) = script.queue.pop_front() {
                    return outcome;
                }
                if let Some(outcome) = &script.default {
                    return outcome.clone();
                }
            }
        }
        Self::network_failure(DIAG_REFUSED)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, base_url: &str, path: &str, api_key: Option<&str>) -> PollOutcome {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockCall {
                base_url: base_url.to_string(),
                path: path.to_string(),
                api_key: api_key.map(str::to_string),
            });

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.panic.load(Ordering::Relaxed) {
            panic!("mock transport panic for {}{}", base_url, path);
        }

        let mut outcome = self.next_reply(&format!("{}{}", base_url, path), path);
        outcome.endpoint_tried = path.to_string();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_is_refused() {
        let mock = MockTransport::new();
        let outcome = mock.get("https://a:8095", "/x", Some("k")).await;
        assert!(outcome.is_network_failure());
        assert_eq!(outcome.raw_body.as_deref(), Some(DIAG_REFUSED));
        assert_eq!(outcome.endpoint_tried, "/x");
        assert_eq!(
            mock.calls(),
            vec![MockCall {
                base_url: "https://a:8095".to_string(),
                path: "/x".to_string(),
                api_key: Some("k".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_url_script_beats_path_script() {
        let mock = MockTransport::new();
        mock.set_default("/s", MockTransport::reply(200, "path"));
        mock.set_default("https://b:8095/s", MockTransport::reply(200, "url"));

        let a = mock.get("https://a:8095", "/s", None).await;
        let b = mock.get("https://b:8095", "/s", None).await;
        assert_eq!(a.raw_body.as_deref(), Some("path"));
        assert_eq!(b.raw_body.as_deref(), Some("url"));
        assert_eq!(mock.call_count_for("https://b:8095"), 1);
    }

    #[tokio::test]
    async fn test_queue_then_default() {
        let mock = MockTransport::new();
        mock.script("/s", MockTransport::network_failure("Connection timed out"));
        mock.set_default("/s", MockTransport::reply(200, "{}"));

        assert!(!mock.get("u", "/s", None).await.reachable);
        assert!(mock.get("u", "/s", None).await.reachable);
        assert!(mock.get("u", "/s", None).await.reachable);
    }
}
