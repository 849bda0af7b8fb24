//! Unit events emitted by reconciliation and the monitor.
//!
//! [`UnitEvent`]s are the significant transitions decided by reconciliation;
//! they drive the notification sink. [`MonitorEvent`]s add a per-poll
//! [`MonitorEvent::Polled`] record for dashboards and other subscribers and
//! are fanned out over a broadcast channel.

use coldwatch_types::{ParsedStatus, PollOutcome, UnitIdentity, UnitPollState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A transition worth telling a human about.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum UnitEvent {
    /// The unit stopped answering after having recently been online.
    Offline { unit: UnitIdentity, message: String },
    /// The unit entered an alarm state.
    AlarmRaised { unit: UnitIdentity, message: String },
    /// The unit left its alarm state.
    AlarmCleared { unit: UnitIdentity },
}

impl UnitEvent {
    /// The unit this event concerns.
    pub fn unit(&self) -> &UnitIdentity {
        match self {
            UnitEvent::Offline { unit, .. }
            | UnitEvent::AlarmRaised { unit, .. }
            | UnitEvent::AlarmCleared { unit } => unit,
        }
    }

    /// The notification text, if this event notifies rather than clears.
    pub fn message(&self) -> Option<&str> {
        match self {
            UnitEvent::Offline { message, .. } | UnitEvent::AlarmRaised { message, .. } => {
                Some(message)
            }
            UnitEvent::AlarmCleared { .. } => None,
        }
    }
}

/// Everything the monitor publishes.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum MonitorEvent {
    /// A poll finished and was reconciled.
    Polled {
        unit: UnitIdentity,
        outcome: PollOutcome,
        status: Option<ParsedStatus>,
        state: UnitPollState,
    },
    /// See [`UnitEvent::Offline`].
    Offline { unit: UnitIdentity, message: String },
    /// See [`UnitEvent::AlarmRaised`].
    AlarmRaised { unit: UnitIdentity, message: String },
    /// See [`UnitEvent::AlarmCleared`].
    AlarmCleared { unit: UnitIdentity },
}

impl From<UnitEvent> for MonitorEvent {
    fn from(event: UnitEvent) -> Self {
        match event {
            UnitEvent::Offline { unit, message } => MonitorEvent::Offline { unit, message },
            UnitEvent::AlarmRaised { unit, message } => MonitorEvent::AlarmRaised { unit, message },
            UnitEvent::AlarmCleared { unit } => MonitorEvent::AlarmCleared { unit },
        }
    }
}

/// Sender for monitor events.
pub type EventSender = broadcast::Sender<MonitorEvent>;

/// Receiver for monitor events.
pub type EventReceiver = broadcast::Receiver<MonitorEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: MonitorEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
