//! Probing a single unit.
//!
//! A probe walks an ordered list of candidate endpoints. Each endpoint gets
//! the bounded retry from [`RetryConfig`], which only fires when no HTTP
//! exchange happened; the first reachable result wins. When every endpoint
//! fails, the most informative failure is returned.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use coldwatch_types::{PollOutcome, Scheme, UnitRecord};
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::retry::{RetryConfig, with_retry};
use crate::transport::Transport;

/// Full-status endpoint.
pub const STATUS_ENDPOINT: &str = "/api/v1/status";
/// Lightweight liveness endpoint.
pub const HEALTH_ENDPOINT: &str = "/api/v1/health";

/// Ordered endpoints tried by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPolicy {
    endpoints: Vec<String>,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self::new([STATUS_ENDPOINT, HEALTH_ENDPOINT])
    }
}

impl EndpointPolicy {
    /// Try `endpoints` in order.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
        }
    }

    /// Only the status endpoint.
    pub fn status_only() -> Self {
        Self::new([STATUS_ENDPOINT])
    }

    /// The endpoints in order.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

/// Options for [`UnitProber`].
#[derive(Debug, Clone, Default)]
pub struct ProbeOptions {
    /// Candidate endpoints.
    pub endpoints: EndpointPolicy,
    /// Per-endpoint retry on network failure.
    pub retry: RetryConfig,
    /// URL scheme.
    pub scheme: Scheme,
}

impl ProbeOptions {
    /// Set the endpoint policy.
    #[must_use]
    pub fn endpoints(mut self, endpoints: EndpointPolicy) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the URL scheme.
    #[must_use]
    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }
}

/// Pick the failure worth reporting: the first with a body, else the last.
pub fn most_informative(failures: Vec<PollOutcome>) -> Option<PollOutcome> {
    if let Some(index) = failures.iter().position(PollOutcome::has_body) {
        return failures.into_iter().nth(index);
    }
    failures.into_iter().last()
}

/// Probes one unit through a shared [`Transport`].
#[derive(Clone)]
pub struct UnitProber {
    transport: Arc<dyn Transport>,
    options: ProbeOptions,
}

impl std::fmt::Debug for UnitProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitProber")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl UnitProber {
    /// Create a prober with default options.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, ProbeOptions::default())
    }

    /// Create a prober with custom options.
    pub fn with_options(transport: Arc<dyn Transport>, options: ProbeOptions) -> Self {
        Self { transport, options }
    }

    /// The options in use.
    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    fn first_endpoint(&self) -> &str {
        self.options
            .endpoints
            .endpoints()
            .first()
            .map(String::as_str)
            .unwrap_or(STATUS_ENDPOINT)
    }

    /// Probe `unit`. Never fails; see the module docs for the policy.
    pub async fn probe(&self, unit: &UnitRecord) -> PollOutcome {
        let base_url = match unit.base_url(self.options.scheme) {
            Ok(url) => url,
            Err(e) => {
                warn!("Unit {} has no usable address: {}", unit.display_id, e);
                return PollOutcome::transport_failure(self.first_endpoint(), e.to_string());
            }
        };
        let api_key = unit.api_key();

        let mut failures = Vec::new();
        for endpoint in self.options.endpoints.endpoints() {
            let name = format!("{} {}", unit.display_id, endpoint);
            let outcome = with_retry(
                &self.options.retry,
                &name,
                || self.transport.get(&base_url, endpoint, api_key),
                PollOutcome::is_network_failure,
            )
            .await;

            if outcome.reachable {
                return outcome;
            }
            debug!(
                "{} failed with status {:?}",
                name,
                outcome.http_status
            );
            failures.push(outcome);
        }

        most_informative(failures).unwrap_or_else(|| {
            PollOutcome::transport_failure(self.first_endpoint(), "no endpoints configured")
        })
    }

    /// Probe `unit`, turning a panic anywhere in the probe into an
    /// unreachable outcome.
    pub async fn probe_isolated(&self, unit: &UnitRecord) -> PollOutcome {
        match AssertUnwindSafe(self.probe(unit)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Probe of unit {} panicked: {}", unit.display_id, message);
                PollOutcome::transport_failure(
                    self.first_endpoint(),
                    format!("probe panicked: {}", message),
                )
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::{DIAG_REFUSED, DIAG_TIMEOUT};

    const BASE: &str = "https://10.0.0.5:8095";

    fn unit() -> UnitRecord {
        UnitRecord::new(1, "Walk-in 1", "10.0.0.5", "secret")
    }

    fn prober(mock: &Arc<MockTransport>) -> UnitProber {
        UnitProber::new(Arc::clone(mock) as Arc<dyn Transport>)
    }

    fn calls_to(mock: &MockTransport, path: &str) -> usize {
        mock.calls().iter().filter(|c| c.path == path).count()
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(200, "{}"));

        let outcome = prober(&mock).probe(&unit()).await;
        assert!(outcome.reachable);
        assert_eq!(outcome.endpoint_tried, STATUS_ENDPOINT);
        assert_eq!(calls_to(&mock, HEALTH_ENDPOINT), 0);
        assert_eq!(mock.calls()[0].base_url, BASE);
        assert_eq!(mock.calls()[0].api_key.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_http_error_falls_back_without_retry() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(500, "overload"));
        mock.set_default(HEALTH_ENDPOINT, MockTransport::reply(200, r#"{"ok":true}"#));

        let outcome = prober(&mock).probe(&unit()).await;
        assert!(outcome.reachable);
        assert_eq!(outcome.http_status, Some(200));
        assert_eq!(outcome.endpoint_tried, HEALTH_ENDPOINT);
        assert_eq!(calls_to(&mock, STATUS_ENDPOINT), 1);
    }

    #[tokio::test]
    async fn test_status_only_policy_never_falls_back() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(500, "overload"));
        mock.set_default(HEALTH_ENDPOINT, MockTransport::reply(200, "{}"));
        let options = ProbeOptions::default().endpoints(EndpointPolicy::status_only());
        let prober = UnitProber::with_options(Arc::clone(&mock) as Arc<dyn Transport>, options);

        let outcome = prober.probe(&unit()).await;
        assert!(!outcome.reachable);
        assert_eq!(outcome.http_status, Some(500));
        assert_eq!(calls_to(&mock, HEALTH_ENDPOINT), 0);
        assert_eq!(EndpointPolicy::status_only().endpoints(), &[STATUS_ENDPOINT.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_retried_once() {
        let mock = Arc::new(MockTransport::new());
        mock.script(STATUS_ENDPOINT, MockTransport::network_failure(DIAG_TIMEOUT));
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(200, "{}"));

        let outcome = prober(&mock).probe(&unit()).await;
        assert!(outcome.reachable);
        assert_eq!(calls_to(&mock, STATUS_ENDPOINT), 2);
        assert_eq!(calls_to(&mock, HEALTH_ENDPOINT), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_network_failures_keep_diagnostic() {
        let mock = Arc::new(MockTransport::new());

        let outcome = prober(&mock).probe(&unit()).await;
        assert!(!outcome.reachable);
        assert_eq!(outcome.http_status, None);
        assert_eq!(outcome.raw_body.as_deref(), Some(DIAG_REFUSED));
        // Two attempts per endpoint.
        assert_eq!(mock.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_first_failure_with_body_wins() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(500, "overload"));
        mock.set_default(HEALTH_ENDPOINT, MockTransport::reply(503, ""));

        let outcome = prober(&mock).probe(&unit()).await;
        assert_eq!(outcome.http_status, Some(500));
        assert_eq!(outcome.raw_body.as_deref(), Some("overload"));
    }

    #[tokio::test]
    async fn test_last_failure_when_no_body() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(500, ""));
        mock.set_default(HEALTH_ENDPOINT, MockTransport::reply(503, ""));

        let outcome = prober(&mock).probe(&unit()).await;
        assert_eq!(outcome.http_status, Some(503));
        assert_eq!(outcome.endpoint_tried, HEALTH_ENDPOINT);
    }

    #[tokio::test]
    async fn test_invalid_address_is_unreachable() {
        let mock = Arc::new(MockTransport::new());
        let record = UnitRecord::new(2, "Broken", "  ", "");

        let outcome = prober(&mock).probe(&record).await;
        assert!(!outcome.reachable);
        assert!(outcome.has_body());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let mock = Arc::new(MockTransport::new());
        mock.set_panic(true);

        let outcome = prober(&mock).probe_isolated(&unit()).await;
        assert!(!outcome.reachable);
        assert!(
            outcome
                .raw_body
                .as_deref()
                .is_some_and(|body| body.contains("panicked"))
        );
    }

    #[test]
    fn test_most_informative() {
        assert_eq!(most_informative(Vec::new()), None);

        let a = PollOutcome::from_response("/a", 500, String::new());
        let b = PollOutcome::transport_failure("/b", DIAG_REFUSED);
        let c = PollOutcome::from_response("/c", 404, String::new());
        assert_eq!(
            most_informative(vec![a.clone(), b.clone(), c.clone()]),
            Some(b)
        );
        assert_eq!(most_informative(vec![a, c.clone()]), Some(c));
    }
}
