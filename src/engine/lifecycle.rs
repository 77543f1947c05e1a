use std::time::Duration;

use tracing::{debug, error, info};

use crate::model::*;
use crate::timer::TimerId;

use super::{Engine, EngineError, SlotCell};

fn window_ms(window: Duration) -> Ms {
    Ms::try_from(window.as_millis()).unwrap_or(Ms::MAX)
}

impl Engine {
    /// Schedule the slot's `kind` timer at `at`, cancelling any previous one.
    ///
    /// The callback holds only a weak reference, so pending timers do not
    /// keep a dropped engine alive.
    pub(super) fn arm(&self, cell: &mut SlotCell, kind: TimerKind, at: Ms) -> Result<(), EngineError> {
        let slot = cell.machine.id();
        let me = self.me.clone();
        let handle = self.timers.schedule(at, move |id| async move {
            if let Some(engine) = me.upgrade() {
                engine.on_timer(slot, kind, id).await;
            }
        })?;
        debug!(slot, timer = kind.as_str(), id = handle.id(), at, "timer armed");
        cell.timers.replace(kind, handle);
        Ok(())
    }

    /// A timer could not be armed: release the slot rather than leave it
    /// waiting for a transition that will never come.
    pub(super) fn fall_back(&self, cell: &mut SlotCell, err: &EngineError) -> Vec<Event> {
        let slot = cell.machine.id();
        error!(slot, state = %cell.machine.state(), "releasing slot after timer failure: {err}");
        metrics::counter!(crate::observability::TIMER_FALLBACKS_TOTAL).increment(1);
        cell.timers.cancel_all();
        cell.machine.force_release().into_iter().collect()
    }

    /// Entry point for every timer callback.
    ///
    /// The callback only acts if its handle is still the slot's current timer
    /// of that kind and the state still expects it. Anything else is a timer
    /// that lost a race with a user action or a re-schedule.
    pub(super) async fn on_timer(&self, slot: SlotId, kind: TimerKind, id: TimerId) {
        let Ok(shared) = self.resolve(slot) else {
            return;
        };
        let mut cell = shared.write().await;
        if !cell.timers.is_current(kind, id) {
            self.stale(slot, kind, cell.machine.state());
            return;
        }
        cell.timers.clear(kind);
        metrics::counter!(crate::observability::TIMERS_FIRED_TOTAL, "timer" => kind.as_str())
            .increment(1);

        let events = match kind {
            TimerKind::Start => self.start_time_reached(&mut cell),
            TimerKind::Confirm => self.arrival_timed_out(&mut cell),
            TimerKind::End => self.end_time_reached(&mut cell),
            TimerKind::Payment => self.payment_timed_out(&mut cell),
        };
        match events {
            Some(events) => self.publish(&events),
            None => self.stale(slot, kind, cell.machine.state()),
        }
    }

    fn stale(&self, slot: SlotId, kind: TimerKind, state: SlotState) {
        debug!(slot, timer = kind.as_str(), %state, "stale timer ignored");
        metrics::counter!(crate::observability::STALE_TIMERS_TOTAL, "timer" => kind.as_str())
            .increment(1);
    }

    fn start_time_reached(&self, cell: &mut SlotCell) -> Option<Vec<Event>> {
        let event = cell.machine.on_start_time()?;
        let mut events = vec![event];
        let confirm_by = self.now_ms().saturating_add(window_ms(self.config.confirm_window));
        info!(slot = cell.machine.id(), confirm_by, "arrival window open");
        if let Err(e) = self.arm(cell, TimerKind::Confirm, confirm_by) {
            events.extend(self.fall_back(cell, &e));
        }
        Some(events)
    }

    fn arrival_timed_out(&self, cell: &mut SlotCell) -> Option<Vec<Event>> {
        let events = cell.machine.on_arrival_timeout()?;
        cell.timers.cancel_all();
        info!(slot = cell.machine.id(), "no arrival, slot released");
        Some(events)
    }

    fn end_time_reached(&self, cell: &mut SlotCell) -> Option<Vec<Event>> {
        let event = cell.machine.on_end_time()?;
        let mut events = vec![event];
        let choose_by = self.now_ms().saturating_add(window_ms(self.config.payment_window));
        info!(slot = cell.machine.id(), choose_by, "booking ended, awaiting payment choice");
        if let Err(e) = self.arm(cell, TimerKind::Payment, choose_by) {
            events.extend(self.fall_back(cell, &e));
        }
        Some(events)
    }

    fn payment_timed_out(&self, cell: &mut SlotCell) -> Option<Vec<Event>> {
        let (booking, events) = cell.machine.on_payment_timeout()?;
        cell.timers.cancel_all();
        info!(
            slot = cell.machine.id(),
            start = booking.start,
            end = booking.end,
            "no payment choice, billing and releasing"
        );
        Some(events)
    }
}
