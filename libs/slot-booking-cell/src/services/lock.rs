use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use shared_models::SlotKey;

use crate::models::ReservationHold;

/// In-process mutual exclusion over slot keys with TTL-bounded holds.
///
/// This only narrows the check-then-commit window inside one process. Across
/// instances, the store's uniqueness constraint is what prevents double
/// bookings.
#[derive(Debug)]
pub struct BookingLockCoordinator {
    holds: DashMap<SlotKey, ReservationHold>,
    ttl: Duration,
}

impl BookingLockCoordinator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            holds: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Succeeds when the slot has no live hold or the live hold is already
    /// `holder_id`'s, in which case its TTL restarts. Failure has no side
    /// effects.
    pub fn acquire(&self, slot: &SlotKey, holder_id: &str) -> bool {
        self.try_acquire(slot, holder_id).is_some()
    }

    /// Like `acquire`, returning the hold now on record.
    pub fn try_acquire(&self, slot: &SlotKey, holder_id: &str) -> Option<ReservationHold> {
        self.acquire_hold(slot, holder_id).map(|(hold, _)| hold)
    }

    /// The flag is true when `holder_id` already had a live hold on the slot.
    fn acquire_hold(&self, slot: &SlotKey, holder_id: &str) -> Option<(ReservationHold, bool)> {
        let now = Instant::now();
        let hold = ReservationHold::new(slot.clone(), holder_id, now, self.ttl);

        match self.holds.entry(slot.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                let live = current.is_live_at(now);
                if live && !current.is_owned_by(holder_id) {
                    debug!(slot = %slot, holder_id, owner = %current.holder_id, "Slot hold contended");
                    return None;
                }
                entry.insert(hold.clone());
                Some((hold, live))
            }
            Entry::Vacant(entry) => {
                entry.insert(hold.clone());
                Some((hold, false))
            }
        }
    }

    /// Acquire and return a guard that releases the hold when dropped.
    ///
    /// If `holder_id` already holds the slot, the TTL restarts and the guard
    /// is re-entrant: dropping it leaves the outer hold in place.
    pub fn lock<'a>(&'a self, slot: &SlotKey, holder_id: &str) -> Option<SlotLockGuard<'a>> {
        let (_, reentrant) = self.acquire_hold(slot, holder_id)?;
        Some(SlotLockGuard {
            coordinator: self,
            slot: slot.clone(),
            holder_id: holder_id.to_string(),
            reentrant,
        })
    }

    /// Removes the hold only if `holder_id` owns it, so a late release cannot
    /// drop a newer holder's lock.
    pub fn release(&self, slot: &SlotKey, holder_id: &str) -> bool {
        let released = self
            .holds
            .remove_if(slot, |_, hold| hold.is_owned_by(holder_id))
            .is_some();
        if released {
            debug!(slot = %slot, holder_id, "Released slot hold");
        }
        released
    }

    /// Live hold on the slot, if any.
    pub fn holder_of(&self, slot: &SlotKey) -> Option<ReservationHold> {
        let now = Instant::now();
        self.holds
            .get(slot)
            .filter(|hold| hold.is_live_at(now))
            .map(|hold| hold.value().clone())
    }

    pub fn is_held(&self, slot: &SlotKey) -> bool {
        self.holder_of(slot).is_some()
    }

    pub fn is_held_by_other(&self, slot: &SlotKey, holder_id: &str) -> bool {
        self.holder_of(slot).is_some_and(|hold| !hold.is_owned_by(holder_id))
    }

    /// Whether the table still has an entry for the slot, expired or not.
    pub fn contains(&self, slot: &SlotKey) -> bool {
        self.holds.contains_key(slot)
    }

    /// Entries in the table, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }

    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.holds.retain(|_, hold| {
            let live = hold.is_live_at(now);
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Sweep on a fixed interval until the handle is dropped or the
    /// coordinator itself is gone.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                let removed = coordinator.sweep_expired();
                if removed > 0 {
                    info!(removed, remaining = coordinator.len(), "Swept expired slot holds");
                }
            }
        });

        SweeperHandle { handle }
    }
}

/// Releases its hold on drop, whichever way the owning scope exits. Only the
/// guard that created the hold releases it.
#[must_use = "the hold is released as soon as the guard is dropped"]
pub struct SlotLockGuard<'a> {
    coordinator: &'a BookingLockCoordinator,
    slot: SlotKey,
    holder_id: String,
    reentrant: bool,
}

impl SlotLockGuard<'_> {
    pub fn slot(&self) -> &SlotKey {
        &self.slot
    }

    /// True when the holder already held the slot as this guard was taken.
    pub fn is_reentrant(&self) -> bool {
        self.reentrant
    }
}

impl Drop for SlotLockGuard<'_> {
    fn drop(&mut self) {
        if !self.reentrant {
            self.coordinator.release(&self.slot, &self.holder_id);
        }
    }
}

/// Background sweep task; aborted when dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop sweeping now rather than when the handle goes out of scope.
    pub fn stop(self) {}

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
