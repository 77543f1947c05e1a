use crate::limits::MAX_BOOKING_DURATION_MS;
use crate::model::*;

use super::EngineError;

/// Per-slot lifecycle state plus the booking it is tracking.
///
/// Pure: no clocks, no timers. User operations validate first and return
/// `Err` with the machine untouched; timer operations return `None` when the
/// state has moved on, which is how stale timers are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMachine {
    id: SlotId,
    state: SlotState,
    booking: Option<Booking>,
}

impl SlotMachine {
    pub fn new(id: SlotId) -> Self {
        Self {
            id,
            state: SlotState::Free,
            booking: None,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn booking(&self) -> Option<&Booking> {
        self.booking.as_ref()
    }

    fn require(&self, op: &'static str, expected: SlotState) -> Result<(), EngineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                slot: self.id,
                op,
                state: self.state,
            })
        }
    }

    fn free(&mut self) -> Option<Booking> {
        self.state = SlotState::Free;
        self.booking.take()
    }

    fn set_end(&mut self, op: &'static str, new_end: Ms, now: Ms) -> Result<Event, EngineError> {
        if new_end <= now || !in_range(new_end) {
            return Err(EngineError::InvalidDuration {
                slot: self.id,
                start: now,
                end: new_end,
            });
        }
        let Some(booking) = self.booking.as_mut() else {
            return Err(EngineError::InvalidTransition {
                slot: self.id,
                op,
                state: self.state,
            });
        };
        if new_end.saturating_sub(booking.start) > MAX_BOOKING_DURATION_MS {
            return Err(EngineError::LimitExceeded("booking too long"));
        }
        booking.end = new_end;
        self.state = SlotState::Occupied;
        Ok(Event::Extended {
            slot: self.id,
            new_end,
        })
    }

    // ── User operations ──────────────────────────────────────

    pub fn reserve(&mut self, start: Ms, end: Ms) -> Result<Event, EngineError> {
        self.require("reserve", SlotState::Free)?;
        let booking = Booking::try_new(start, end).ok_or(EngineError::InvalidDuration {
            slot: self.id,
            start,
            end,
        })?;
        if booking.duration_ms() > MAX_BOOKING_DURATION_MS {
            return Err(EngineError::LimitExceeded("booking too long"));
        }
        self.state = SlotState::Reserved;
        self.booking = Some(booking);
        Ok(Event::Reserved {
            slot: self.id,
            booking_id: booking.id,
            start,
            end,
        })
    }

    pub fn confirm_arrival(&mut self) -> Result<Event, EngineError> {
        self.require("confirm arrival for", SlotState::ArrivalWindow)?;
        let end = self
            .booking
            .as_ref()
            .map(|b| b.end)
            .ok_or(EngineError::InvalidTransition {
                slot: self.id,
                op: "confirm arrival for",
                state: self.state,
            })?;
        self.state = SlotState::Occupied;
        Ok(Event::ArrivalConfirmed { slot: self.id, end })
    }

    pub fn extend(&mut self, new_end: Ms, now: Ms) -> Result<Event, EngineError> {
        self.require("extend", SlotState::Occupied)?;
        self.set_end("extend", new_end, now)
    }

    /// Finish the cycle and bill it. Returns the closed booking.
    pub fn choose_payment(&mut self) -> Result<(Booking, Vec<Event>), EngineError> {
        self.require("choose payment for", SlotState::PaymentPending)?;
        self.settle().ok_or(EngineError::InvalidTransition {
            slot: self.id,
            op: "choose payment for",
            state: SlotState::Free,
        })
    }

    pub fn choose_extend_instead(&mut self, new_end: Ms, now: Ms) -> Result<Event, EngineError> {
        self.require("extend", SlotState::PaymentPending)?;
        self.set_end("extend", new_end, now)
    }

    /// Cleanup path: drop whatever is in progress without billing.
    pub fn release(&mut self) -> Result<Event, EngineError> {
        if self.state == SlotState::Free {
            return Err(EngineError::InvalidTransition {
                slot: self.id,
                op: "release",
                state: self.state,
            });
        }
        self.free();
        Ok(Event::Released { slot: self.id })
    }

    // ── Timer operations ─────────────────────────────────────

    pub fn on_start_time(&mut self) -> Option<Event> {
        if self.state != SlotState::Reserved {
            return None;
        }
        self.state = SlotState::ArrivalWindow;
        Some(Event::ArrivalWindowStarted { slot: self.id })
    }

    pub fn on_arrival_timeout(&mut self) -> Option<Vec<Event>> {
        if self.state != SlotState::ArrivalWindow {
            return None;
        }
        self.free();
        Some(vec![
            Event::ArrivalTimedOut { slot: self.id },
            Event::Released { slot: self.id },
        ])
    }

    pub fn on_end_time(&mut self) -> Option<Event> {
        if self.state != SlotState::Occupied {
            return None;
        }
        self.state = SlotState::PaymentPending;
        Some(Event::EndReached { slot: self.id })
    }

    pub fn on_payment_timeout(&mut self) -> Option<(Booking, Vec<Event>)> {
        if self.state != SlotState::PaymentPending {
            return None;
        }
        self.settle()
    }

    /// Unconditional return to `Free`, used when a timer cannot be armed.
    pub fn force_release(&mut self) -> Option<Event> {
        self.release().ok()
    }

    fn settle(&mut self) -> Option<(Booking, Vec<Event>)> {
        let slot = self.id;
        let booking = self.free()?;
        let events = vec![
            Event::PaymentDue {
                slot,
                start: booking.start,
                end: booking.end,
            },
            Event::Released { slot },
        ];
        Some((booking, events))
    }
}
