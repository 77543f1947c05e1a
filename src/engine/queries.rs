use crate::model::*;
use crate::status::{summarize, Summary};

use super::{Engine, EngineError, SharedSlot};

impl Engine {
    pub async fn state(&self, slot: SlotId) -> Result<SlotState, EngineError> {
        let shared = self.resolve(slot)?;
        let cell = shared.read().await;
        Ok(cell.machine.state())
    }

    pub async fn snapshot(&self, slot: SlotId) -> Result<SlotSnapshot, EngineError> {
        let shared = self.resolve(slot)?;
        let cell = shared.read().await;
        Ok(cell.snapshot())
    }

    /// Snapshots of every slot, ordered by id. Each slot is read under its
    /// own lock, so the list is per-slot consistent but not a global instant.
    pub async fn snapshots(&self) -> Vec<SlotSnapshot> {
        let mut out = Vec::with_capacity(self.slots.len());
        for shared in self.ordered_slots() {
            out.push(shared.read().await.snapshot());
        }
        out
    }

    pub async fn summary(&self) -> Summary {
        let mut states = Vec::with_capacity(self.slots.len());
        for shared in self.ordered_slots() {
            states.push(shared.read().await.machine.state());
        }
        let summary = summarize(states);
        crate::observability::record_summary(&summary);
        summary
    }

    fn ordered_slots(&self) -> Vec<SharedSlot> {
        self.slot_ids()
            .into_iter()
            .filter_map(|id| self.get_slot(id))
            .collect()
    }
}
