use crate::model::{Ms, SlotId, SlotState};
use crate::timer::TimerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    UnknownSlot(SlotId),
    InvalidTransition {
        slot: SlotId,
        op: &'static str,
        state: SlotState,
    },
    InvalidDuration {
        slot: SlotId,
        start: Ms,
        end: Ms,
    },
    LimitExceeded(&'static str),
    Timer(TimerError),
}

impl EngineError {
    /// Stable short name, used for metrics labels and wire replies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnknownSlot(_) => "unknown_slot",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::InvalidDuration { .. } => "invalid_duration",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Timer(_) => "timer",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnknownSlot(id) => write!(f, "unknown slot: {id}"),
            EngineError::InvalidTransition { slot, op, state } => {
                write!(f, "cannot {op} slot {slot} while {state}")
            }
            EngineError::InvalidDuration { slot, start, end } => {
                write!(f, "invalid interval for slot {slot}: end {end} must be after {start}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Timer(e) => write!(f, "timer error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TimerError> for EngineError {
    fn from(e: TimerError) -> Self {
        EngineError::Timer(e)
    }
}
