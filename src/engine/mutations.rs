use tracing::info;

use crate::model::*;

use super::{Engine, EngineError, SlotCell};

/// Count rejected operations by kind before handing the result back.
fn observe<T>(op: &'static str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(e) = &result {
        tracing::debug!(op, "rejected: {e}");
        metrics::counter!(crate::observability::REJECTIONS_TOTAL, "op" => op, "kind" => e.kind())
            .increment(1);
    }
    result
}

fn current_booking(cell: &SlotCell) -> Result<Booking, EngineError> {
    cell.machine
        .booking()
        .copied()
        .ok_or(EngineError::InvalidTransition {
            slot: cell.machine.id(),
            op: "read booking of",
            state: cell.machine.state(),
        })
}

impl Engine {
    /// Reserve a free slot for `[start, end)`. The start timer is armed at
    /// `start`; a start already in the past opens the arrival window at once.
    pub async fn reserve(&self, slot: SlotId, start: Ms, end: Ms) -> Result<Booking, EngineError> {
        observe("reserve", self.try_reserve(slot, start, end).await)
    }

    async fn try_reserve(&self, slot: SlotId, start: Ms, end: Ms) -> Result<Booking, EngineError> {
        let shared = self.resolve(slot)?;
        let mut cell = shared.write().await;
        let before = cell.machine.clone();
        let event = cell.machine.reserve(start, end)?;
        if let Err(e) = self.arm(&mut cell, TimerKind::Start, start) {
            // Nothing was announced yet, so simply undo.
            cell.machine = before;
            return Err(e);
        }
        let booking = current_booking(&cell)?;
        self.publish(&[event]);
        info!(slot, start, end, booking = %booking.id, "slot reserved");
        Ok(booking)
    }

    /// Claim a slot during its arrival window.
    pub async fn confirm_arrival(&self, slot: SlotId) -> Result<Booking, EngineError> {
        observe("confirm_arrival", self.try_confirm_arrival(slot).await)
    }

    async fn try_confirm_arrival(&self, slot: SlotId) -> Result<Booking, EngineError> {
        let shared = self.resolve(slot)?;
        let mut cell = shared.write().await;
        let event = cell.machine.confirm_arrival()?;
        cell.timers.cancel(TimerKind::Confirm);
        let booking = current_booking(&cell)?;
        self.rearm_end(&mut cell, event, booking.end)?;
        info!(slot, until = booking.end, "arrival confirmed");
        Ok(booking)
    }

    /// Move the end of an occupied slot's booking. `new_end` must be in the future.
    pub async fn extend(&self, slot: SlotId, new_end: Ms) -> Result<Booking, EngineError> {
        observe("extend", self.try_extend(slot, new_end, false).await)
    }

    /// Answer the payment prompt by extending instead of paying.
    pub async fn choose_extend_instead(&self, slot: SlotId, new_end: Ms) -> Result<Booking, EngineError> {
        observe("choose_extend", self.try_extend(slot, new_end, true).await)
    }

    async fn try_extend(&self, slot: SlotId, new_end: Ms, from_prompt: bool) -> Result<Booking, EngineError> {
        let shared = self.resolve(slot)?;
        let mut cell = shared.write().await;
        let now = self.now_ms();
        let event = if from_prompt {
            cell.machine.choose_extend_instead(new_end, now)?
        } else {
            cell.machine.extend(new_end, now)?
        };
        cell.timers.cancel(TimerKind::Payment);
        self.rearm_end(&mut cell, event, new_end)?;
        info!(slot, new_end, "booking extended");
        current_booking(&cell)
    }

    /// Arm the end timer after a transition into `Occupied` and announce it.
    /// On timer failure the slot is released and the failure returned.
    fn rearm_end(&self, cell: &mut SlotCell, event: Event, end: Ms) -> Result<(), EngineError> {
        let mut events = vec![event];
        if let Err(e) = self.arm(cell, TimerKind::End, end) {
            events.extend(self.fall_back(cell, &e));
            self.publish(&events);
            return Err(e);
        }
        self.publish(&events);
        Ok(())
    }

    /// Answer the payment prompt by paying: the slot is freed and `PaymentDue`
    /// is emitted. Returns the finished booking.
    pub async fn choose_payment(&self, slot: SlotId) -> Result<Booking, EngineError> {
        observe("choose_payment", self.try_choose_payment(slot).await)
    }

    async fn try_choose_payment(&self, slot: SlotId) -> Result<Booking, EngineError> {
        let shared = self.resolve(slot)?;
        let mut cell = shared.write().await;
        let (booking, events) = cell.machine.choose_payment()?;
        cell.timers.cancel_all();
        self.publish(&events);
        info!(slot, start = booking.start, end = booking.end, "payment chosen, slot released");
        Ok(booking)
    }

    /// Drop a reservation or occupancy without billing.
    pub async fn release(&self, slot: SlotId) -> Result<(), EngineError> {
        observe("release", self.try_release(slot).await)
    }

    async fn try_release(&self, slot: SlotId) -> Result<(), EngineError> {
        let shared = self.resolve(slot)?;
        let mut cell = shared.write().await;
        let event = cell.machine.release()?;
        cell.timers.cancel_all();
        self.publish(&[event]);
        info!(slot, "slot released");
        Ok(())
    }
}
