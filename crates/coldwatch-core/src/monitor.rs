//! Live monitoring of every registered unit.
//!
//! The [`Monitor`] keeps one [`UnitScheduler`] per unit, all feeding a
//! shared [`Reconciler`]. [`Monitor::sync`] brings the running set in line
//! with the registry: new units start polling, removed units are cancelled
//! and their state dropped, and edited units restart with the new snapshot
//! while keeping their reconciliation state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use coldwatch_types::UnitRecord;
use futures::future::join_all;
use tracing::{debug, info};

use crate::events::EventReceiver;
use crate::prober::UnitProber;
use crate::reconcile::Reconciler;
use crate::scheduler::{OutcomeHandler, UnitScheduler};

/// What a [`Monitor::sync`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Units that started polling.
    pub started: Vec<u64>,
    /// Units restarted because their record changed.
    pub restarted: Vec<u64>,
    /// Units that stopped polling.
    pub stopped: Vec<u64>,
}

impl SyncSummary {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.restarted.is_empty() && self.stopped.is_empty()
    }
}

/// True when two records reach the same device the same way.
///
/// List position is ignored; reordering units does not restart polling.
fn same_target(a: &UnitRecord, b: &UnitRecord) -> bool {
    a.display_id == b.display_id
        && a.address == b.address
        && a.port == b.port
        && a.api_key == b.api_key
}

/// Owns the per-unit schedulers.
pub struct Monitor {
    prober: UnitProber,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    schedulers: HashMap<u64, UnitScheduler>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("interval", &self.interval)
            .field("units", &self.running_units())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Create a monitor polling every `interval`.
    pub fn new(prober: UnitProber, reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            prober,
            reconciler,
            interval,
            schedulers: HashMap::new(),
        }
    }

    /// The shared reconciler.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Subscribe to monitor events.
    pub fn subscribe(&self) -> EventReceiver {
        self.reconciler.subscribe()
    }

    /// Ids of units being polled, ascending.
    pub fn running_units(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.schedulers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// True when `unit_id` is being polled.
    pub fn is_running(&self, unit_id: u64) -> bool {
        self.schedulers.contains_key(&unit_id)
    }

    fn spawn(&self, unit: UnitRecord) -> UnitScheduler {
        let handler: Arc<dyn OutcomeHandler> = Arc::clone(&self.reconciler) as Arc<dyn OutcomeHandler>;
        let mut scheduler = UnitScheduler::new(unit, self.interval, self.prober.clone(), handler);
        scheduler.start();
        scheduler
    }

    /// Start polling `unit`. Returns `false` if it is already polled.
    pub fn add_unit(&mut self, unit: UnitRecord) -> bool {
        if self.schedulers.contains_key(&unit.id) {
            return false;
        }
        info!("Starting monitor for unit {} ({})", unit.display_id, unit.id);
        let id = unit.id;
        let scheduler = self.spawn(unit);
        self.schedulers.insert(id, scheduler);
        true
    }

    /// Stop polling a unit and drop its state. Returns `false` if it was not
    /// polled.
    pub async fn remove_unit(&mut self, unit_id: u64) -> bool {
        let Some(mut scheduler) = self.schedulers.remove(&unit_id) else {
            return false;
        };
        scheduler.cancel().await;
        self.reconciler.forget(unit_id);
        info!(
            "Stopped monitor for unit {} ({})",
            scheduler.unit().display_id,
            unit_id
        );
        true
    }

    async fn restart(&mut self, unit: UnitRecord) {
        if let Some(mut old) = self.schedulers.remove(&unit.id) {
            old.cancel().await;
        }
        debug!("Restarting monitor for unit {} ({})", unit.display_id, unit.id);
        let id = unit.id;
        let scheduler = self.spawn(unit);
        self.schedulers.insert(id, scheduler);
    }

    /// Bring the running schedulers in line with `units`.
    pub async fn sync(&mut self, units: &[UnitRecord]) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let wanted: HashSet<u64> = units.iter().map(|u| u.id).collect();

        let mut gone: Vec<u64> = self
            .schedulers
            .keys()
            .filter(|id| !wanted.contains(id))
            .copied()
            .collect();
        gone.sort_unstable();
        for id in gone {
            if self.remove_unit(id).await {
                summary.stopped.push(id);
            }
        }

        for unit in units {
            let changed = match self.schedulers.get(&unit.id) {
                Some(scheduler) => !same_target(scheduler.unit(), unit),
                None => {
                    if self.add_unit(unit.clone()) {
                        summary.started.push(unit.id);
                    }
                    continue;
                }
            };
            if changed {
                self.restart(unit.clone()).await;
                summary.restarted.push(unit.id);
            }
        }

        if !summary.is_empty() {
            info!(
                "Unit sync: {} started, {} restarted, {} stopped",
                summary.started.len(),
                summary.restarted.len(),
                summary.stopped.len()
            );
        }
        summary
    }

    /// Cancel every scheduler and wait for all of them.
    pub async fn shutdown(&mut self) {
        let count = self.schedulers.len();
        join_all(self.schedulers.values_mut().map(|s| s.cancel())).await;
        self.schedulers.clear();
        info!("Monitor stopped ({} units)", count);
    }
}
