use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Change feed per article. Every committed event that touches a roll of an
/// article is sent on that article's channel.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
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

    /// Subscribe to changes on an article. Creates the channel if needed.
    pub fn subscribe(&self, article: &str) -> broadcast::Receiver<Event> {
        if let Some(sender) = self.channels.get(article) {
            return sender.subscribe();
        }
        self.channels
            .entry(article.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, article: &str, event: &Event) {
        if let Some(sender) = self.channels.get(article) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel once the last subscriber is gone.
    pub fn prune(&self, article: &str) {
        self.channels
            .remove_if(article, |_, sender| sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("LIN-01");

        let event = Event::ReservationAdded {
            roll_id: Ulid::new(),
            meters: 3.0,
        };
        hub.send("LIN-01", &event);
        hub.send("WOOL-2", &Event::RollDeleted { id: Ulid::new() });

        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send("LIN-01", &Event::RollDeleted { id: Ulid::new() });
    }

    #[test]
    fn prune_keeps_live_channels() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe("LIN-01");
        hub.prune("LIN-01");
        assert!(hub.channels.contains_key("LIN-01"));
        drop(rx);
        hub.prune("LIN-01");
        assert!(!hub.channels.contains_key("LIN-01"));
    }
}
