use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{MAX_INSTANT_MS, MIN_INSTANT_MS};

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Slots are numbered `1..=N` at startup and never change.
pub type SlotId = u32;

/// The reserved interval `[start, end)` of one reservation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

impl Booking {
    /// Returns `None` unless `end > start` and both are valid instants.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (end > start && in_range(start) && in_range(end)).then(|| Self {
            id: Ulid::new(),
            start,
            end,
        })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }
}

/// Whether `t` lies in the range of instants the engine accepts.
pub fn in_range(t: Ms) -> bool {
    (MIN_INSTANT_MS..=MAX_INSTANT_MS).contains(&t)
}

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Free,
    Reserved,
    ArrivalWindow,
    Occupied,
    PaymentPending,
}

impl SlotState {
    pub const ALL: [SlotState; 5] = [
        SlotState::Free,
        SlotState::Reserved,
        SlotState::ArrivalWindow,
        SlotState::Occupied,
        SlotState::PaymentPending,
    ];

    /// Three-bucket grouping shown to users.
    pub fn bucket(self) -> Bucket {
        match self {
            SlotState::Free => Bucket::Free,
            SlotState::Reserved | SlotState::ArrivalWindow => Bucket::Reserved,
            SlotState::Occupied | SlotState::PaymentPending => Bucket::Occupied,
        }
    }

    /// Human-readable text for a slot in this state.
    pub fn label(self) -> &'static str {
        match self {
            SlotState::Free => "Available",
            SlotState::Reserved => "Reserved",
            SlotState::ArrivalWindow => "Awaiting arrival",
            SlotState::Occupied => "Occupied",
            SlotState::PaymentPending => "Payment pending",
        }
    }

    /// The timer a slot in this state must be holding, if any.
    pub fn expected_timer(self) -> Option<TimerKind> {
        match self {
            SlotState::Free => None,
            SlotState::Reserved => Some(TimerKind::Start),
            SlotState::ArrivalWindow => Some(TimerKind::Confirm),
            SlotState::Occupied => Some(TimerKind::End),
            SlotState::PaymentPending => Some(TimerKind::Payment),
        }
    }
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SlotState::Free => "free",
            SlotState::Reserved => "reserved",
            SlotState::ArrivalWindow => "arrival_window",
            SlotState::Occupied => "occupied",
            SlotState::PaymentPending => "payment_pending",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Free,
    Reserved,
    Occupied,
}

/// The four per-slot timers owned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Start,
    Confirm,
    End,
    Payment,
}

impl TimerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerKind::Start => "start",
            TimerKind::Confirm => "confirm",
            TimerKind::End => "end",
            TimerKind::Payment => "payment",
        }
    }
}

/// Lifecycle notifications. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Reserved {
        slot: SlotId,
        booking_id: Ulid,
        start: Ms,
        end: Ms,
    },
    ArrivalWindowStarted {
        slot: SlotId,
    },
    ArrivalConfirmed {
        slot: SlotId,
        end: Ms,
    },
    ArrivalTimedOut {
        slot: SlotId,
    },
    EndReached {
        slot: SlotId,
    },
    Extended {
        slot: SlotId,
        new_end: Ms,
    },
    PaymentDue {
        slot: SlotId,
        start: Ms,
        end: Ms,
    },
    Released {
        slot: SlotId,
    },
}

impl Event {
    pub fn slot(&self) -> SlotId {
        match self {
            Event::Reserved { slot, .. }
            | Event::ArrivalWindowStarted { slot }
            | Event::ArrivalConfirmed { slot, .. }
            | Event::ArrivalTimedOut { slot }
            | Event::EndReached { slot }
            | Event::Extended { slot, .. }
            | Event::PaymentDue { slot, .. }
            | Event::Released { slot } => *slot,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Reserved { .. } => "reserved",
            Event::ArrivalWindowStarted { .. } => "arrival_window_started",
            Event::ArrivalConfirmed { .. } => "arrival_confirmed",
            Event::ArrivalTimedOut { .. } => "arrival_timed_out",
            Event::EndReached { .. } => "end_reached",
            Event::Extended { .. } => "extended",
            Event::PaymentDue { .. } => "payment_due",
            Event::Released { .. } => "released",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub id: SlotId,
    pub state: SlotState,
    pub label: &'static str,
    pub booking: Option<Booking>,
    /// When the next automatic transition is due. Remaining time is
    /// `deadline - now`; the engine never ticks.
    pub deadline: Option<Ms>,
    pub timers: Vec<TimerKind>,
}

impl SlotSnapshot {
    /// State and live timers agree, and a booking exists iff not `Free`.
    pub fn is_consistent(&self) -> bool {
        let timers_ok = match self.state.expected_timer() {
            None => self.timers.is_empty(),
            Some(kind) => self.timers == [kind],
        };
        let booking_ok = self.booking.is_some() == (self.state != SlotState::Free);
        timers_ok && booking_ok
    }
}
