//! Background sweeps over all units.
//!
//! A sweep polls every registered unit once, concurrently, each probe in its
//! own task so a panic in one never stops the others. Cancelling a sweep
//! aborts the probes still running. Outcomes go through the same
//! [`Reconciler`] as live polling. [`Sweeper::run_periodic`] repeats sweeps
//! on a long interval, re-reading the registry each time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use coldwatch_types::{PollOutcome, UnitRecord};
use futures::future::join_all;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::events::UnitEvent;
use crate::prober::{STATUS_ENDPOINT, UnitProber};
use crate::reconcile::Reconciler;
use crate::registry::UnitRegistry;

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Result of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Units polled.
    pub polled: usize,
    /// Units that answered.
    pub online: usize,
    /// Units with an outstanding alarm notification after the sweep.
    pub in_alarm: usize,
    /// Events surfaced during the sweep.
    pub events: Vec<UnitEvent>,
}

/// Polls all units once per call.
#[derive(Debug, Clone)]
pub struct Sweeper {
    prober: UnitProber,
    reconciler: Arc<Reconciler>,
}

impl Sweeper {
    /// Create a sweeper.
    pub fn new(prober: UnitProber, reconciler: Arc<Reconciler>) -> Self {
        Self { prober, reconciler }
    }

    /// The shared reconciler.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Poll every unit once and reconcile the outcomes.
    ///
    /// Probe tasks live in a [`JoinSet`], so dropping this future aborts
    /// every probe still in flight.
    pub async fn sweep(&self, units: &[UnitRecord]) -> SweepReport {
        let mut tasks = JoinSet::new();
        for (index, unit) in units.iter().cloned().enumerate() {
            let prober = self.prober.clone();
            tasks.spawn(async move { (index, prober.probe_isolated(&unit).await) });
        }

        let mut results: Vec<Option<PollOutcome>> = vec![None; units.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => results[index] = Some(outcome),
                Err(e) => error!("Sweep task failed: {}", e),
            }
        }

        let outcomes: Vec<(&UnitRecord, PollOutcome)> = units
            .iter()
            .zip(results)
            .map(|(unit, result)| {
                let outcome = result.unwrap_or_else(|| {
                    PollOutcome::transport_failure(STATUS_ENDPOINT, "poll task failed")
                });
                (unit, outcome)
            })
            .collect();

        let online = outcomes.iter().filter(|(_, o)| o.reachable).count();
        let applied = join_all(
            outcomes
                .into_iter()
                .map(|(unit, outcome)| self.reconciler.apply(unit, outcome)),
        )
        .await;

        let mut in_alarm = 0;
        for unit in units {
            if let Some(state) = self.reconciler.state(unit.id).await
                && state.alarm_currently_notified
            {
                in_alarm += 1;
            }
        }

        let report = SweepReport {
            polled: units.len(),
            online,
            in_alarm,
            events: applied.into_iter().flatten().collect(),
        };
        info!(
            "Sweep complete: {}/{} online, {} in alarm",
            report.online, report.polled, report.in_alarm
        );
        report
    }

    /// Sweep every `interval` until `token` is cancelled.
    ///
    /// The registry is re-read before each sweep; state for units that have
    /// been removed is dropped.
    pub async fn run_periodic(
        &self,
        registry: Arc<dyn UnitRegistry>,
        interval: Duration,
        token: CancellationToken,
    ) {
        info!("Background sweep every {:?}", interval);
        loop {
            match registry.list_registered_units() {
                Ok(units) => {
                    let registered: HashSet<u64> = units.iter().map(|u| u.id).collect();
                    for id in self.reconciler.tracked_units() {
                        if !registered.contains(&id) {
                            self.reconciler.forget(id);
                        }
                    }

                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = self.sweep(&units) => {}
                    }
                }
                Err(e) => warn!("Skipping sweep, cannot list units: {}", e),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }
        info!("Background sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::notify::RecordingSink;
    use crate::reconcile::DebouncePolicy;
    use crate::registry::MemoryRegistry;
    use crate::transport::Transport;

    fn setup() -> (Arc<MockTransport>, Arc<RecordingSink>, Sweeper) {
        let mock = Arc::new(MockTransport::new());
        let sink = Arc::new(RecordingSink::new());
        let reconciler = Arc::new(Reconciler::new(DebouncePolicy::default(), sink.clone()));
        let sweeper = Sweeper::new(
            UnitProber::new(Arc::clone(&mock) as Arc<dyn Transport>),
            reconciler,
        );
        (mock, sink, sweeper)
    }

    fn unit(id: u64) -> UnitRecord {
        UnitRecord::new(id, format!("Unit {}", id), format!("10.0.0.{}", id), "k")
    }

    fn url(id: u64) -> String {
        format!("https://10.0.0.{}:8095{}", id, STATUS_ENDPOINT)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_counts() {
        let (mock, sink, sweeper) = setup();
        mock.set_default(&url(1), MockTransport::reply(200, "{}"));
        mock.set_default(
            &url(2),
            MockTransport::reply(200, r#"{"active_alarms": ["E04"]}"#),
        );

        let report = sweeper.sweep(&[unit(1), unit(2), unit(3)]).await;
        assert_eq!(report.polled, 3);
        assert_eq!(report.online, 2);
        assert_eq!(report.in_alarm, 1);
        assert_eq!(report.events.len(), 1);
        assert_eq!(sink.messages(), vec!["Active alarms: E04"]);
    }

    #[tokio::test]
    async fn test_sweep_with_panicking_transport() {
        let (mock, _sink, sweeper) = setup();
        mock.set_panic(true);

        let report = sweeper.sweep(&[unit(1), unit(2)]).await;
        assert_eq!(report.polled, 2);
        assert_eq!(report.online, 0);
        let state = sweeper.reconciler().state(2).await.unwrap();
        assert_eq!(state.consecutive_failure_count, 1);
    }

    #[tokio::test]
    async fn test_sweep_empty() {
        let (_mock, _sink, sweeper) = setup();
        let report = sweeper.sweep(&[]).await;
        assert_eq!(report.polled, 0);
        assert!(report.events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_sweep_aborts_in_flight_polls() {
        let (mock, sink, sweeper) = setup();
        mock.set_latency(Duration::from_secs(2));
        let registry = Arc::new(MemoryRegistry::new(vec![unit(1), unit(2)]));
        let token = CancellationToken::new();

        let task = {
            let sweeper = sweeper.clone();
            let registry = Arc::clone(&registry) as Arc<dyn UnitRegistry>;
            let token = token.clone();
            tokio::spawn(async move {
                sweeper
                    .run_periodic(registry, Duration::from_secs(600), token)
                    .await;
            })
        };

        sleep(Duration::from_millis(500)).await;
        token.cancel();
        task.await.unwrap();
        let at_cancel = mock.calls().len();
        assert_eq!(at_cancel, 2);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.calls().len(), at_cancel);
        assert!(sink.calls().is_empty());
        assert!(sweeper.reconciler().tracked_units().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_periodic_until_cancelled() {
        let (mock, _sink, sweeper) = setup();
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(200, "{}"));
        let registry = Arc::new(MemoryRegistry::new(vec![unit(1), unit(2)]));
        let token = CancellationToken::new();

        let task = {
            let sweeper = sweeper.clone();
            let registry = Arc::clone(&registry) as Arc<dyn UnitRegistry>;
            let token = token.clone();
            tokio::spawn(async move {
                sweeper
                    .run_periodic(registry, Duration::from_secs(600), token)
                    .await;
            })
        };

        sleep(Duration::from_secs(601)).await;
        assert_eq!(mock.calls().len(), 4);

        // Removing a unit drops its state on the next sweep.
        registry.set_units(vec![unit(1)]);
        sleep(Duration::from_secs(600)).await;
        assert_eq!(sweeper.reconciler().tracked_units(), vec![1]);

        token.cancel();
        task.await.unwrap();
    }
}
