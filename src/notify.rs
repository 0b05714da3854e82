use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-room broadcast of committed booking events, for calendars that want live updates.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a room's events, creating the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening. Drops the channel once its last receiver is gone.
    pub fn send(&self, event: &Event) {
        let room_id = event.room_id();
        let orphaned = match self.channels.get(&room_id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => return,
        };
        if orphaned {
            self.channels
                .remove_if(&room_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    #[cfg(test)]
    fn watched_rooms(&self) -> usize {
        self.channels.len()
    }
}
