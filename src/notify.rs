use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-item broadcast of committed ledger events.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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
        }
    }

    /// Subscribe to an item's events. Creates the channel if needed.
    pub fn subscribe(&self, item_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(item_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, item_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&item_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop an item's channel. Open receivers see the channel close.
    pub fn remove(&self, item_id: &Ulid) {
        self.channels.remove(item_id);
    }
}
