//! Debounce and alarm reconciliation.
//!
//! [`reconcile`] is the single, pure state transition: given the previous
//! [`UnitPollState`], one [`PollOutcome`] and its interpreted status, it
//! returns the next state and the events worth surfacing. [`Reconciler`]
//! owns the per-unit states, serializes writers per unit and hands events to
//! the notification sink and the event stream.
//!
//! # Reachability
//!
//! A failure increments the failure count. When the count reaches
//! [`DebouncePolicy::failure_threshold`] the debounced reachability flips to
//! offline; an [`UnitEvent::Offline`] is emitted only if the unit was online
//! before and its last success lies within the recency window. A success
//! resets the count and marks the unit online without any notification.
//!
//! # Alarms
//!
//! Alarm notifications are edge-triggered: one notify on entry, one clear on
//! exit, nothing while the alarm persists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coldwatch_types::{ParsedStatus, PollOutcome, UnitIdentity, UnitPollState, UnitRecord};
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::events::{EventDispatcher, EventReceiver, MonitorEvent, UnitEvent};
use crate::notify::NotificationSink;
use crate::status::interpret;
use crate::util::truncate_with_ellipsis;

/// Longest diagnostic or body quoted in an offline message.
pub const MAX_OFFLINE_BODY_CHARS: usize = 300;

/// Tunables for offline debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    /// Consecutive failures before the unit counts as offline.
    pub failure_threshold: u32,
    /// How recent the last success must be for an offline notification.
    pub recency_window: Duration,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            recency_window: Duration::from_secs(60),
        }
    }
}

impl DebouncePolicy {
    /// Set the failure threshold.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the recency window.
    #[must_use]
    pub fn recency_window(mut self, window: Duration) -> Self {
        self.recency_window = window;
        self
    }
}

/// Text of an offline notification.
pub fn offline_message(unit: &UnitIdentity, outcome: &PollOutcome) -> String {
    let code = outcome
        .http_status
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    let detail = outcome
        .raw_body
        .as_deref()
        .map(str::trim)
        .filter(|body| !body.is_empty())
        .map(|body| truncate_with_ellipsis(body, MAX_OFFLINE_BODY_CHARS))
        .unwrap_or_else(|| "no response".to_string());
    format!(
        "Unit {} is offline (endpoint={} code={}): {}",
        unit.display_id, outcome.endpoint_tried, code, detail
    )
}

/// Text of an alarm notification.
pub fn alarm_message(unit: &UnitIdentity, status: &ParsedStatus) -> String {
    status
        .alarm_description
        .clone()
        .unwrap_or_else(|| format!("Alarm on unit {}", unit.display_id))
}

/// Apply one poll outcome to a unit's state.
///
/// `status` is the interpreted status of a reachable outcome; pass `None`
/// to leave the alarm flag untouched.
pub fn reconcile(
    state: &UnitPollState,
    unit: &UnitIdentity,
    outcome: &PollOutcome,
    status: Option<&ParsedStatus>,
    policy: &DebouncePolicy,
    now: OffsetDateTime,
) -> (UnitPollState, Vec<UnitEvent>) {
    let mut next = state.clone();
    let mut events = Vec::new();

    if outcome.reachable {
        next.consecutive_failure_count = 0;
        next.last_success_at = Some(now);
        next.last_known_reachable = Some(true);
    } else {
        next.consecutive_failure_count = state.consecutive_failure_count.saturating_add(1);
        let threshold = policy.failure_threshold.max(1);

        if next.consecutive_failure_count >= threshold && state.last_known_reachable != Some(false)
        {
            let recently_online = state.last_known_reachable == Some(true)
                && state
                    .last_success_at
                    .is_some_and(|at| now - at <= policy.recency_window);
            if recently_online {
                events.push(UnitEvent::Offline {
                    unit: unit.clone(),
                    message: offline_message(unit, outcome),
                });
            }
            next.last_known_reachable = Some(false);
        }
    }

    if let Some(status) = status {
        if status.alarm_active && !state.alarm_currently_notified {
            events.push(UnitEvent::AlarmRaised {
                unit: unit.clone(),
                message: alarm_message(unit, status),
            });
            next.alarm_currently_notified = true;
        } else if !status.alarm_active && state.alarm_currently_notified {
            events.push(UnitEvent::AlarmCleared { unit: unit.clone() });
            next.alarm_currently_notified = false;
        }
    }

    (next, events)
}

type StateSlot = Arc<AsyncMutex<UnitPollState>>;

/// Owns per-unit state and delivers reconciliation events.
///
/// Writers for one unit are serialized by a per-unit async lock that is
/// held across reconciliation and sink dispatch, so notifications for a unit
/// are delivered in decision order.
pub struct Reconciler {
    policy: DebouncePolicy,
    sink: Arc<dyn NotificationSink>,
    events: EventDispatcher,
    states: Mutex<HashMap<u64, StateSlot>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("policy", &self.policy)
            .field("units", &self.tracked_units().len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler with its own event stream.
    pub fn new(policy: DebouncePolicy, sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_events(policy, sink, EventDispatcher::default())
    }

    /// Create a reconciler publishing to an existing dispatcher.
    pub fn with_events(
        policy: DebouncePolicy,
        sink: Arc<dyn NotificationSink>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            policy,
            sink,
            events,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// The debounce policy.
    pub fn policy(&self) -> &DebouncePolicy {
        &self.policy
    }

    /// The event dispatcher.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Subscribe to monitor events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<u64, StateSlot>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, unit_id: u64) -> StateSlot {
        Arc::clone(self.lock_states().entry(unit_id).or_default())
    }

    /// Reconcile `outcome` for `unit` at the current time.
    pub async fn apply(&self, unit: &UnitRecord, outcome: PollOutcome) -> Vec<UnitEvent> {
        self.apply_at(unit, outcome, OffsetDateTime::now_utc()).await
    }

    /// Reconcile `outcome` for `unit` as of `now`.
    pub async fn apply_at(
        &self,
        unit: &UnitRecord,
        outcome: PollOutcome,
        now: OffsetDateTime,
    ) -> Vec<UnitEvent> {
        let identity = unit.identity();
        let status = interpret(&outcome);

        let slot = self.slot(unit.id);
        let mut state = slot.lock().await;
        let (next, events) = reconcile(
            &state,
            &identity,
            &outcome,
            status.as_ref(),
            &self.policy,
            now,
        );
        *state = next.clone();

        if outcome.reachable {
            debug!("Unit {} reachable via {}", identity, outcome.endpoint_tried);
        } else {
            warn!(
                "Unit {} unreachable ({} consecutive failures): endpoint={} code={:?}",
                identity,
                next.consecutive_failure_count,
                outcome.endpoint_tried,
                outcome.http_status
            );
        }

        for event in &events {
            self.dispatch(event).await;
        }

        self.events.send(MonitorEvent::Polled {
            unit: identity,
            outcome,
            status,
            state: next,
        });
        for event in &events {
            self.events.send(event.clone().into());
        }

        drop(state);
        events
    }

    async fn dispatch(&self, event: &UnitEvent) {
        let result = match event {
            UnitEvent::Offline { unit, message } | UnitEvent::AlarmRaised { unit, message } => {
                info!("Notifying for unit {}: {}", unit, message);
                self.sink.notify(unit, message).await
            }
            UnitEvent::AlarmCleared { unit } => {
                info!("Clearing alarm notification for unit {}", unit);
                self.sink.clear(unit).await
            }
        };
        if let Err(e) = result {
            warn!("Notification for unit {} failed: {}", event.unit(), e);
        }
    }

    /// Current state of a unit, if it has been polled.
    pub async fn state(&self, unit_id: u64) -> Option<UnitPollState> {
        let slot = self.lock_states().get(&unit_id).cloned()?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    /// Drop a unit's state. Returns `true` if it was tracked.
    pub fn forget(&self, unit_id: u64) -> bool {
        self.lock_states().remove(&unit_id).is_some()
    }

    /// Ids of units with state.
    pub fn tracked_units(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.lock_states().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
