use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::EVENT_CHANNEL_CAPACITY;
use crate::model::{Event, SlotId};

/// Broadcast hub for lifecycle events, per slot and across all slots.
pub struct NotifyHub {
    channels: DashMap<SlotId, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to events of one slot. Creates the channel if needed.
    pub fn subscribe(&self, slot: SlotId) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(slot)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.slot()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }

    /// Drop every per-slot channel, ending those subscriptions.
    pub fn close(&self) {
        self.channels.clear();
    }
}
