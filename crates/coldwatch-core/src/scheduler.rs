//! Periodic polling of one unit.
//!
//! A [`UnitScheduler`] owns a background task that probes its unit
//! immediately, hands the outcome to an [`OutcomeHandler`], then sleeps for
//! the interval and repeats. Cancellation is cooperative: it is observed
//! while probing and while sleeping, an in-flight request is dropped, and
//! nothing is handed over once cancellation has been seen.
//! [`UnitScheduler::cancel`] waits for the task to finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coldwatch_types::{PollOutcome, UnitRecord};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::prober::UnitProber;
use crate::reconcile::Reconciler;

/// Default interval between live polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Receives every poll outcome of a scheduler.
#[async_trait]
pub trait OutcomeHandler: Send + Sync {
    /// Handle the outcome of one poll of `unit`.
    async fn handle(&self, unit: &UnitRecord, outcome: PollOutcome);
}

#[async_trait]
impl OutcomeHandler for Reconciler {
    async fn handle(&self, unit: &UnitRecord, outcome: PollOutcome) {
        self.apply(unit, outcome).await;
    }
}

/// Lifecycle of a [`UnitScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, not started.
    Idle,
    /// Background task running.
    Running,
    /// Cancelled; cannot be restarted.
    Cancelled,
}

/// Polls one unit on a fixed interval until cancelled.
pub struct UnitScheduler {
    unit: UnitRecord,
    interval: Duration,
    prober: UnitProber,
    handler: Arc<dyn OutcomeHandler>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    state: SchedulerState,
}

impl std::fmt::Debug for UnitScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitScheduler")
            .field("unit", &self.unit.display_id)
            .field("interval", &self.interval)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl UnitScheduler {
    /// Create an idle scheduler for `unit`.
    pub fn new(
        unit: UnitRecord,
        interval: Duration,
        prober: UnitProber,
        handler: Arc<dyn OutcomeHandler>,
    ) -> Self {
        Self {
            unit,
            interval,
            prober,
            handler,
            cancel_token: CancellationToken::new(),
            handle: None,
            state: SchedulerState::Idle,
        }
    }

    /// The unit snapshot this scheduler polls.
    pub fn unit(&self) -> &UnitRecord {
        &self.unit
    }

    /// The polling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Start polling. Returns `false` if the scheduler was already started
    /// or cancelled.
    pub fn start(&mut self) -> bool {
        if self.state != SchedulerState::Idle {
            return false;
        }

        let unit = self.unit.clone();
        let interval = self.interval;
        let prober = self.prober.clone();
        let handler = Arc::clone(&self.handler);
        let token = self.cancel_token.clone();

        self.handle = Some(tokio::spawn(async move {
            poll_loop(unit, interval, prober, handler, token).await;
        }));
        self.state = SchedulerState::Running;
        true
    }

    /// Cancel polling and wait for the background task to end.
    ///
    /// Once this returns, no further outcome for this unit reaches the
    /// handler.
    pub async fn cancel(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
            && e.is_panic()
        {
            warn!("Scheduler for unit {} panicked", self.unit.display_id);
        }
        self.state = SchedulerState::Cancelled;
    }
}

impl Drop for UnitScheduler {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn poll_loop(
    unit: UnitRecord,
    interval: Duration,
    prober: UnitProber,
    handler: Arc<dyn OutcomeHandler>,
    token: CancellationToken,
) {
    info!("Polling unit {} every {:?}", unit.display_id, interval);

    loop {
        let outcome = tokio::select! {
            _ = token.cancelled() => break,
            outcome = prober.probe_isolated(&unit) => outcome,
        };
        if token.is_cancelled() {
            break;
        }
        handler.handle(&unit, outcome).await;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }

    debug!("Stopped polling unit {}", unit.display_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::prober::STATUS_ENDPOINT;
    use crate::transport::Transport;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingHandler {
        outcomes: Mutex<Vec<PollOutcome>>,
    }

    impl CollectingHandler {
        fn count(&self) -> usize {
            self.outcomes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl OutcomeHandler for CollectingHandler {
        async fn handle(&self, _unit: &UnitRecord, outcome: PollOutcome) {
            self.outcomes.lock().unwrap().push(outcome);
        }
    }

    fn setup() -> (Arc<MockTransport>, Arc<CollectingHandler>, UnitScheduler) {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(STATUS_ENDPOINT, MockTransport::reply(200, "{}"));
        let handler = Arc::new(CollectingHandler::default());
        let scheduler = UnitScheduler::new(
            UnitRecord::new(1, "Walk-in 1", "10.0.0.5", "k"),
            DEFAULT_POLL_INTERVAL,
            UnitProber::new(Arc::clone(&mock) as Arc<dyn Transport>),
            Arc::clone(&handler) as Arc<dyn OutcomeHandler>,
        );
        (mock, handler, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_immediately_then_on_interval() {
        let (_mock, handler, mut scheduler) = setup();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.start());
        assert_eq!(scheduler.state(), SchedulerState::Running);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(handler.count(), 1);

        sleep(Duration::from_secs(30)).await;
        // t = 0, 15, 30
        assert_eq!(handler.count(), 3);

        scheduler.cancel().await;
        assert_eq!(scheduler.state(), SchedulerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let (mock, handler, mut scheduler) = setup();
        scheduler.start();
        sleep(Duration::from_secs(1)).await;
        scheduler.cancel().await;

        let seen = handler.count();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(handler.count(), seen);
        assert_eq!(mock.calls().len(), seen);
        assert!(!scheduler.start(), "cancelled schedulers cannot restart");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_in_flight_poll() {
        let (mock, handler, mut scheduler) = setup();
        mock.set_latency(Duration::from_secs(10));
        scheduler.start();

        sleep(Duration::from_secs(1)).await;
        scheduler.cancel().await;
        sleep(Duration::from_secs(60)).await;

        assert_eq!(handler.count(), 0);
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_probe_keeps_scheduler_alive() {
        let (mock, handler, mut scheduler) = setup();
        mock.set_panic(true);
        scheduler.start();

        sleep(Duration::from_secs(16)).await;
        assert_eq!(handler.count(), 2);
        assert!(
            handler
                .outcomes
                .lock()
                .unwrap()
                .iter()
                .all(|o| !o.reachable)
        );
        scheduler.cancel().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (_mock, _handler, mut scheduler) = setup();
        assert!(scheduler.start());
        assert!(!scheduler.start());
        scheduler.cancel().await;
    }
}
