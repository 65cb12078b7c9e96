use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// One message to the counterparty of a transition. Losing a notice never
/// affects lesson state — this is a live-session channel, not an audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub recipient: Ulid,
    pub lesson_id: Ulid,
    pub event: Event,
}

/// Broadcast hub, one channel per actor. Constructed once at startup and
/// passed into the engine — there is no module-level singleton.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    /// Subscribe to an actor's notices. Creates the channel if needed;
    /// dropping the receiver unsubscribes.
    pub fn subscribe(&self, actor_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(actor_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Fan out to current subscribers. No-op if nobody is listening.
    pub fn send(&self, notice: Notice) {
        if let Some(sender) = self.channels.get(&notice.recipient) {
            metrics::counter!(crate::observability::NOTICES_SENT_TOTAL).increment(1);
            let _ = sender.send(notice);
        }
    }
}
