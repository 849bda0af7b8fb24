//! Wiring between configuration, registry and the polling engine.

use std::sync::Arc;

use coldwatch_core::events::MonitorEvent;
use coldwatch_core::{
    FanoutSink, HttpTransport, LogSink, Monitor, NotificationSink, Reconciler, SweepReport,
    Sweeper, UnitProber, UnitRegistry, WebhookSink,
};
use coldwatch_types::{PollOutcome, UnitRecord};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, NotificationsConfig, PollMode};

/// Build the notification sink described by `[notifications]`.
pub fn build_sink(config: &NotificationsConfig) -> coldwatch_core::Result<Arc<dyn NotificationSink>> {
    let mut fanout = FanoutSink::new();
    if config.log {
        fanout = fanout.with(Arc::new(LogSink));
    }
    if let Some(url) = &config.webhook_url {
        fanout = fanout.with(Arc::new(WebhookSink::new(url.clone())?));
    }
    if fanout.is_empty() {
        warn!("No notification targets configured; transitions will only be logged at debug level");
    }
    Ok(Arc::new(fanout))
}

/// A configured prober and reconciler.
#[derive(Debug)]
pub struct Runtime {
    config: Config,
    prober: UnitProber,
    reconciler: Arc<Reconciler>,
}

impl Runtime {
    /// Build the HTTP prober and notification sinks from `config`.
    pub fn from_config(config: Config) -> coldwatch_core::Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.monitor.request_timeout())?);
        let prober = UnitProber::with_options(transport, config.probe_options());
        let sink = build_sink(&config.notifications)?;
        let reconciler = Arc::new(Reconciler::new(config.debounce_policy(), sink));
        Ok(Self::new(config, prober, reconciler))
    }

    /// Assemble a runtime from parts.
    pub fn new(config: Config, prober: UnitProber, reconciler: Arc<Reconciler>) -> Self {
        Self {
            config,
            prober,
            reconciler,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared reconciler.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Probe one unit without reconciling.
    pub async fn probe(&self, unit: &UnitRecord) -> PollOutcome {
        self.prober.probe(unit).await
    }

    /// Poll `units` once and reconcile.
    pub async fn sweep_once(&self, units: &[UnitRecord]) -> SweepReport {
        Sweeper::new(self.prober.clone(), Arc::clone(&self.reconciler))
            .sweep(units)
            .await
    }

    /// Run in the configured mode until `token` is cancelled.
    pub async fn run(&self, registry: Arc<dyn UnitRegistry>, token: CancellationToken) {
        match self.config.monitor.mode {
            PollMode::Live => self.run_live(registry, token).await,
            PollMode::Sweep => self.run_sweep(registry, token).await,
        }
    }

    /// Poll every unit on its own loop, re-reading the registry every
    /// `registry.refresh_secs`.
    pub async fn run_live(&self, registry: Arc<dyn UnitRegistry>, token: CancellationToken) {
        let mut monitor = Monitor::new(
            self.prober.clone(),
            Arc::clone(&self.reconciler),
            self.config.monitor.poll_interval(),
        );
        let logger = tokio::spawn(log_events(monitor.subscribe(), token.clone()));
        let refresh = self.config.registry.refresh_interval();
        info!(
            "Live monitoring every {:?}, registry refresh every {:?}",
            self.config.monitor.poll_interval(),
            refresh
        );

        loop {
            match registry.list_registered_units() {
                Ok(units) => {
                    monitor.sync(&units).await;
                }
                Err(e) => warn!("Keeping current units, cannot list registry: {}", e),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(refresh) => {}
            }
        }

        monitor.shutdown().await;
        if let Err(e) = logger.await {
            warn!("Event logger task failed: {}", e);
        }
    }

    /// Sweep all units every `sweep.interval_secs`.
    pub async fn run_sweep(&self, registry: Arc<dyn UnitRegistry>, token: CancellationToken) {
        Sweeper::new(self.prober.clone(), Arc::clone(&self.reconciler))
            .run_periodic(registry, self.config.sweep.interval(), token)
            .await;
    }
}

async fn log_events(mut rx: coldwatch_core::EventReceiver, token: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(MonitorEvent::Polled { unit, outcome, .. }) => {
                debug!(
                    "Polled {}: reachable={} endpoint={} code={:?}",
                    unit.display_id, outcome.reachable, outcome.endpoint_tried, outcome.http_status
                );
            }
            Ok(other) => debug!("Monitor event: {:?}", other),
            Err(RecvError::Lagged(n)) => debug!("Event logger skipped {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coldwatch_core::notify::RecordingSink;
    use coldwatch_core::transport::Transport;
    use coldwatch_core::{DebouncePolicy, MemoryRegistry, MockTransport, STATUS_ENDPOINT};
    use std::time::Duration;

    fn runtime(config: Config) -> (Arc<MockTransport>, Arc<RecordingSink>, Runtime) {
        let mock = Arc::new(MockTransport::new());
        let sink = Arc::new(RecordingSink::new());
        let prober =
            UnitProber::with_options(Arc::clone(&mock) as Arc<dyn Transport>, config.probe_options());
        let reconciler = Arc::new(Reconciler::new(DebouncePolicy::default(), sink.clone()));
        (mock, sink, Runtime::new(config, prober, reconciler))
    }

    fn unit(id: u64) -> UnitRecord {
        UnitRecord::new(id, format!("Unit {}", id), format!("10.0.0.{}", id), "k")
    }

    #[test]
    fn test_build_sink() {
        let config = NotificationsConfig {
            log: true,
            webhook_url: Some("http://127.0.0.1:9/hook".to_string()),
        };
        assert!(build_sink(&config).is_ok());

        let none = NotificationsConfig {
            log: false,
            webhook_url: None,
        };
        assert!(build_sink(&none).is_ok());
    }

    #[tokio::test]
    async fn test_from_config() {
        let runtime = Runtime::from_config(Config::default()).unwrap();
        assert_eq!(runtime.config().monitor.poll_interval_secs, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_live_follows_registry() {
        let (mock, _sink, runtime) = runtime(Config::default());
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(200, "{}"));
        let registry = Arc::new(MemoryRegistry::new(vec![unit(1)]));
        let token = CancellationToken::new();

        let task = {
            let registry = Arc::clone(&registry) as Arc<dyn UnitRegistry>;
            let token = token.clone();
            tokio::spawn(async move { runtime.run_live(registry, token).await })
        };

        sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.call_count_for("https://10.0.0.2:8095"), 0);

        registry.set_units(vec![unit(1), unit(2)]);
        sleep(Duration::from_secs(31)).await;
        assert!(mock.call_count_for("https://10.0.0.2:8095") >= 1);

        token.cancel();
        task.await.unwrap();
        let after = mock.calls().len();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(mock.calls().len(), after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweep_mode() {
        let mut config = Config::default();
        config.monitor.mode = PollMode::Sweep;
        let (mock, sink, runtime) = runtime(config);
        mock.set_default(
            STATUS_ENDPOINT,
            MockTransport::reply(200, r#"{"alarm_shutdown": true}"#),
        );
        let registry: Arc<dyn UnitRegistry> = Arc::new(MemoryRegistry::new(vec![unit(1), unit(2)]));
        let token = CancellationToken::new();

        let task = {
            let token = token.clone();
            tokio::spawn(async move { runtime.run(registry, token).await })
        };
        sleep(Duration::from_secs(1)).await;
        token.cancel();
        task.await.unwrap();

        assert_eq!(mock.calls().len(), 2);
        assert_eq!(sink.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweep_cancel_stops_in_flight_polls() {
        let mut config = Config::default();
        config.monitor.mode = PollMode::Sweep;
        let (mock, sink, runtime) = runtime(config);
        mock.set_latency(Duration::from_secs(2));
        let registry: Arc<dyn UnitRegistry> = Arc::new(MemoryRegistry::new(vec![unit(1), unit(2)]));
        let token = CancellationToken::new();

        let task = {
            let token = token.clone();
            tokio::spawn(async move { runtime.run(registry, token).await })
        };
        sleep(Duration::from_millis(500)).await;
        token.cancel();
        task.await.unwrap();

        let at_cancel = mock.calls().len();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.calls().len(), at_cancel);
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_once() {
        let (mock, _sink, runtime) = runtime(Config::default());
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(200, "{}"));
        let report = runtime.sweep_once(&[unit(1)]).await;
        assert_eq!(report.polled, 1);
        assert_eq!(report.online, 1);
    }
}
