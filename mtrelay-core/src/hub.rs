//! Downstream fan-in point for websocket clients.
//!
//! The global feed is one broadcast channel and each follower with an open
//! stream gets its own. Publishing never waits: a reader that falls more than
//! `buffer` frames behind loses the oldest ones and receives a
//! [`StreamMessage::Gap`] before the next surviving frame.

use crate::metrics::RelayMetrics;
use mtrelay_sdk::objects::event::Event;
use mtrelay_sdk::objects::stream::{FanoutMessage, StreamMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

type Frame = Arc<StreamMessage>;

#[derive(Clone)]
pub struct StreamHub {
    shared: Arc<HubShared>,
}

struct HubShared {
    channels: Mutex<Channels>,
    buffer: usize,
    metrics: Arc<RelayMetrics>,
}

struct Channels {
    /// `None` once the hub is closed.
    global: Option<broadcast::Sender<Frame>>,
    followers: HashMap<String, broadcast::Sender<Frame>>,
    closed: bool,
}

/// Receiving end of one downstream connection. Unregisters on drop.
pub struct StreamSubscription {
    follower: Option<String>,
    receiver: broadcast::Receiver<Frame>,
    hub: Arc<HubShared>,
}

impl StreamSubscription {
    /// Next frame for this connection. `None` once the hub closed it.
    pub async fn recv(&mut self) -> Option<Frame> {
        match self.receiver.recv().await {
            Ok(frame) => Some(frame),
            Err(RecvError::Lagged(dropped)) => {
                RelayMetrics::add(&self.hub.metrics.downstream_dropped, dropped);
                Some(Arc::new(StreamMessage::Gap { dropped }))
            }
            Err(RecvError::Closed) => None,
        }
    }

    pub fn follower(&self) -> Option<&str> {
        self.follower.as_deref()
    }

    /// Frames published since this connection last read.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        if let Some(follower) = &self.follower {
            let mut channels = self.hub.channels.lock();
            // Our own receiver is still counted here.
            let last = channels
                .followers
                .get(follower)
                .is_some_and(|sender| sender.receiver_count() <= 1);
            if last {
                channels.followers.remove(follower);
            }
        }
        RelayMetrics::decr(&self.hub.metrics.downstream_connections);
    }
}

impl StreamHub {
    pub fn new(buffer: usize, metrics: Arc<RelayMetrics>) -> Self {
        let buffer = buffer.max(1);
        let (global, _) = broadcast::channel(buffer);
        Self {
            shared: Arc::new(HubShared {
                channels: Mutex::new(Channels {
                    global: Some(global),
                    followers: HashMap::new(),
                    closed: false,
                }),
                buffer,
                metrics,
            }),
        }
    }

    fn register(&self, follower: Option<String>) -> StreamSubscription {
        let receiver = {
            let mut channels = self.shared.channels.lock();
            match (&follower, channels.closed) {
                // A closed hub hands out receivers that end immediately.
                (_, true) => broadcast::channel(1).1,
                (None, false) => match &channels.global {
                    Some(sender) => sender.subscribe(),
                    None => broadcast::channel(1).1,
                },
                (Some(key), false) => channels
                    .followers
                    .entry(key.clone())
                    .or_insert_with(|| broadcast::channel(self.shared.buffer).0)
                    .subscribe(),
            }
        };
        RelayMetrics::incr(&self.shared.metrics.downstream_connections);
        StreamSubscription {
            follower,
            receiver,
            hub: self.shared.clone(),
        }
    }

    /// Join the global feed.
    pub fn subscribe_global(&self) -> StreamSubscription {
        self.register(None)
    }

    /// Join the sealed fanout stream of one follower.
    pub fn subscribe_follower(&self, follower_pubkey: &str) -> StreamSubscription {
        self.register(Some(follower_pubkey.to_owned()))
    }

    /// Publish to every global subscriber. Returns the number of readers reached.
    pub fn publish_event(&self, event: &Event) -> usize {
        let channels = self.shared.channels.lock();
        let Some(sender) = &channels.global else {
            return 0;
        };
        if sender.receiver_count() == 0 {
            return 0;
        }
        let frame = Arc::new(StreamMessage::Event {
            event: event.clone(),
        });
        sender.send(frame).unwrap_or(0)
    }

    /// Publish a sealed payload to the addressed follower's connections.
    pub fn publish_fanout(&self, message: FanoutMessage) -> usize {
        let channels = self.shared.channels.lock();
        let Some(sender) = channels.followers.get(&message.follower_pubkey) else {
            return 0;
        };
        sender
            .send(Arc::new(StreamMessage::Fanout { message }))
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        let channels = self.shared.channels.lock();
        channels
            .global
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
            + channels
                .followers
                .values()
                .map(broadcast::Sender::receiver_count)
                .sum::<usize>()
    }

    /// End every stream. Readers drain what is buffered, then see `None`.
    pub fn close_all(&self) {
        let mut channels = self.shared.channels.lock();
        channels.closed = true;
        channels.global = None;
        channels.followers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64) -> Event {
        Event {
            id: format!("{n:064x}"),
            author_key: "a".repeat(64),
            created_at: n,
            kind: 30931,
            tags: Vec::new(),
            payload: String::new(),
            signature: String::new(),
        }
    }

    fn fanout(follower: &str) -> FanoutMessage {
        FanoutMessage {
            bot_pubkey: "bot".to_string(),
            follower_pubkey: follower.to_string(),
            event_id: "id".to_string(),
            kind: 30931,
            created_at: 0,
            sealed_payload: "sealed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_slow_reader_stays_bounded() {
        let metrics = Arc::new(RelayMetrics::default());
        let hub = StreamHub::new(4, metrics.clone());
        let mut sub = hub.subscribe_global();
        for n in 0..100 {
            hub.publish_event(&event(n));
        }

        let first = sub.recv().await.unwrap();
        assert_eq!(*first, StreamMessage::Gap { dropped: 96 });
        assert_eq!(metrics.summary().downstream_dropped_total, 96);
        match &*sub.recv().await.unwrap() {
            StreamMessage::Event { event } => assert_eq!(event.created_at, 96),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sub.queued(), 3);
    }

    #[tokio::test]
    async fn test_fanout_reaches_only_addressed_follower() {
        let hub = StreamHub::new(8, Arc::new(RelayMetrics::default()));
        let f1 = hub.subscribe_follower("f1");
        let f2 = hub.subscribe_follower("f2");
        let global = hub.subscribe_global();

        assert_eq!(hub.publish_fanout(fanout("f1")), 1);
        assert_eq!(f1.queued(), 1);
        assert_eq!(f2.queued(), 0);
        assert_eq!(global.queued(), 0);
        assert_eq!(hub.publish_fanout(fanout("nobody")), 0);
    }

    #[tokio::test]
    async fn test_drop_unregisters_and_close_ends_stream() {
        let metrics = Arc::new(RelayMetrics::default());
        let hub = StreamHub::new(8, metrics.clone());
        let mut a = hub.subscribe_global();
        let b = hub.subscribe_follower("f1");
        assert_eq!(hub.connection_count(), 2);
        assert_eq!(metrics.summary().downstream_connections, 2);
        drop(b);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(metrics.summary().downstream_connections, 1);
        assert_eq!(hub.publish_fanout(fanout("f1")), 0);

        assert_eq!(hub.publish_event(&event(1)), 1);
        hub.close_all();
        assert!(a.recv().await.is_some());
        assert!(a.recv().await.is_none());
        assert_eq!(hub.publish_event(&event(2)), 0);

        let mut late = hub.subscribe_follower("f1");
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_follower_channel_shared_until_last_reader_leaves() {
        let hub = StreamHub::new(8, Arc::new(RelayMetrics::default()));
        let mut first = hub.subscribe_follower("f1");
        let mut second = hub.subscribe_follower("f1");
        assert_eq!(hub.publish_fanout(fanout("f1")), 2);
        assert!(matches!(*first.recv().await.unwrap(), StreamMessage::Fanout { .. }));
        assert!(matches!(*second.recv().await.unwrap(), StreamMessage::Fanout { .. }));

        drop(first);
        assert_eq!(hub.publish_fanout(fanout("f1")), 1);
        drop(second);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.publish_fanout(fanout("f1")), 0);
    }
}
