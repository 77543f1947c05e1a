use serde::Serialize;

use crate::model::{Bucket, SlotState};

/// Occupancy counts in the three-bucket view shown to users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub free: usize,
    pub reserved: usize,
    pub occupied: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.free + self.reserved + self.occupied
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Free: {} | Reserved: {} | Occupied: {}",
            self.free, self.reserved, self.occupied
        )
    }
}

/// Count slots per bucket. Every state lands in exactly one bucket, so the
/// counts always add up to the number of states given.
pub fn summarize<I>(states: I) -> Summary
where
    I: IntoIterator<Item = SlotState>,
{
    states
        .into_iter()
        .fold(Summary::default(), |mut acc, state| {
            match state.bucket() {
                Bucket::Free => acc.free += 1,
                Bucket::Reserved => acc.reserved += 1,
                Bucket::Occupied => acc.occupied += 1,
            }
            acc
        })
}
