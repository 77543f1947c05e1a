mod error;
mod lifecycle;
mod machine;
mod mutations;
mod queries;

pub use error::EngineError;
pub use machine::SlotMachine;

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::limits::{MAX_SLOTS, MAX_WINDOW_MS};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::timer::{TimerHandle, TimerId, TimerService};

pub type SharedSlot = Arc<RwLock<SlotCell>>;

/// The timers a slot owns, at most one per kind.
#[derive(Debug, Default)]
pub struct SlotTimers {
    start: Option<TimerHandle>,
    confirm: Option<TimerHandle>,
    end: Option<TimerHandle>,
    payment: Option<TimerHandle>,
}

impl SlotTimers {
    fn entry(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Start => &mut self.start,
            TimerKind::Confirm => &mut self.confirm,
            TimerKind::End => &mut self.end,
            TimerKind::Payment => &mut self.payment,
        }
    }

    pub fn get(&self, kind: TimerKind) -> Option<&TimerHandle> {
        match kind {
            TimerKind::Start => self.start.as_ref(),
            TimerKind::Confirm => self.confirm.as_ref(),
            TimerKind::End => self.end.as_ref(),
            TimerKind::Payment => self.payment.as_ref(),
        }
    }

    /// Install `handle`, cancelling whatever was there before.
    fn replace(&mut self, kind: TimerKind, handle: TimerHandle) {
        if let Some(prev) = self.entry(kind).replace(handle) {
            prev.cancel();
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(prev) = self.entry(kind).take() {
            prev.cancel();
        }
    }

    fn cancel_all(&mut self) {
        for kind in [
            TimerKind::Start,
            TimerKind::Confirm,
            TimerKind::End,
            TimerKind::Payment,
        ] {
            self.cancel(kind);
        }
    }

    /// Forget a handle whose callback is running now.
    fn clear(&mut self, kind: TimerKind) {
        self.entry(kind).take();
    }

    fn is_current(&self, kind: TimerKind, id: TimerId) -> bool {
        self.get(kind).is_some_and(|h| h.id() == id)
    }

    pub fn kinds(&self) -> Vec<TimerKind> {
        [
            TimerKind::Start,
            TimerKind::Confirm,
            TimerKind::End,
            TimerKind::Payment,
        ]
        .into_iter()
        .filter(|k| self.get(*k).is_some())
        .collect()
    }
}

/// Everything the engine tracks for one slot, guarded by one lock.
#[derive(Debug)]
pub struct SlotCell {
    machine: SlotMachine,
    timers: SlotTimers,
}

impl SlotCell {
    fn new(id: SlotId) -> Self {
        Self {
            machine: SlotMachine::new(id),
            timers: SlotTimers::default(),
        }
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        let state = self.machine.state();
        SlotSnapshot {
            id: self.machine.id(),
            state,
            label: state.label(),
            booking: self.machine.booking().copied(),
            deadline: state
                .expected_timer()
                .and_then(|kind| self.timers.get(kind))
                .map(TimerHandle::at),
            timers: self.timers.kinds(),
        }
    }
}

/// Lifecycle scheduler over a fixed set of slots.
///
/// Each slot sits behind its own `RwLock`; user operations and timer
/// callbacks for one slot take the write lock, so they never interleave,
/// while different slots proceed independently.
pub struct Engine {
    me: Weak<Engine>,
    slots: DashMap<SlotId, SharedSlot>,
    timers: TimerService,
    pub notify: Arc<NotifyHub>,
    config: LifecycleConfig,
}

impl Engine {
    /// Create slots `1..=slot_count`, all free.
    pub fn new(
        slot_count: u32,
        config: LifecycleConfig,
        clock: Clock,
        notify: Arc<NotifyHub>,
    ) -> Result<Arc<Self>, EngineError> {
        if slot_count == 0 {
            return Err(EngineError::LimitExceeded("at least one slot required"));
        }
        if slot_count > MAX_SLOTS {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        let max_window = Duration::from_millis(MAX_WINDOW_MS);
        if config.confirm_window > max_window || config.payment_window > max_window {
            return Err(EngineError::LimitExceeded("lifecycle window too long"));
        }
        let slots = DashMap::new();
        for id in 1..=slot_count {
            slots.insert(id, Arc::new(RwLock::new(SlotCell::new(id))));
        }
        info!(
            slots = slot_count,
            confirm_window_ms = config.confirm_window.as_millis() as u64,
            payment_window_ms = config.payment_window.as_millis() as u64,
            "engine started"
        );
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            slots,
            timers: TimerService::new(clock),
            notify,
            config,
        }))
    }

    pub fn now_ms(&self) -> Ms {
        self.timers.clock().now_ms()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_ids(&self) -> Vec<SlotId> {
        let mut ids: Vec<SlotId> = self.slots.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Timers scheduled and neither fired nor cancelled.
    pub fn live_timers(&self) -> usize {
        self.timers.live()
    }

    pub fn get_slot(&self, id: SlotId) -> Option<SharedSlot> {
        self.slots.get(&id).map(|e| e.value().clone())
    }

    pub(super) fn resolve(&self, id: SlotId) -> Result<SharedSlot, EngineError> {
        self.get_slot(id).ok_or(EngineError::UnknownSlot(id))
    }

    /// Log, count and broadcast events. Callers still hold the slot lock, so
    /// subscribers see each slot's events in transition order.
    pub(super) fn publish(&self, events: &[Event]) {
        for event in events {
            debug!(slot = event.slot(), "event {}", event.name());
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "event" => event.name())
                .increment(1);
            self.notify.send(event);
        }
        metrics::gauge!(crate::observability::TIMERS_LIVE).set(self.timers.live() as f64);
    }

    /// Stop scheduling and cancel every slot timer. Slot states are left as
    /// they are; nothing advances afterwards.
    pub async fn shutdown(&self) {
        self.timers.close();
        let slots: Vec<SharedSlot> = self.slots.iter().map(|e| e.value().clone()).collect();
        for shared in slots {
            shared.write().await.timers.cancel_all();
        }
        self.notify.close();
        info!("engine stopped, {} timers still live", self.timers.live());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for entry in self.slots.iter() {
            if let Ok(mut cell) = entry.value().try_write() {
                cell.timers.cancel_all();
            }
        }
    }
}
