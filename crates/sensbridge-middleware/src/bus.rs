//! Headless, topic-addressed publish/subscribe bus used as the live emit
//! transport.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others. Publishing is synchronous and never waits, which is what the
//! scheduler thread needs.
//!
//! # Topics
//!
//! Unlike a fixed set of lanes, topics are created on first use: the first
//! [`EventBus::subscribe`] or [`EventBus::publish`] for a topic name opens its
//! channel. A topic "has an active consumer" while at least one
//! [`TopicReceiver`] for it is alive.
//!
//! Latched topics additionally remember their last [`Envelope`] and hand it to
//! every new subscriber first, so a value published once (e.g. static robot
//! info) still reaches late subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use sensbridge_types::Envelope;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Topics {
    senders: HashMap<String, broadcast::Sender<Envelope>>,
    latched: HashSet<String>,
    last: HashMap<String, Envelope>,
}

/// Shared bus. Clone it cheaply – all clones share the same topic table.
///
/// A "session" of the bridge is one `EventBus`; re-attaching to a new
/// session means handing every publisher a different `EventBus`.
#[derive(Clone, Debug)]
pub struct EventBus {
    capacity: usize,
    topics: Arc<RwLock<Topics>>,
}

impl EventBus {
    /// Create a new bus with the given per-topic channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Arc::new(RwLock::new(Topics::default())),
        }
    }

    /// Mark `topic` as latched: its last message is replayed to every new
    /// subscriber.
    pub fn latch(&self, topic: &str) {
        self.topics.write().latched.insert(topic.to_string());
    }

    /// Publish `envelope` on its topic.
    ///
    /// Returns the number of receivers that were handed the message.
    /// `Ok(0)` when nobody listens is a normal condition, not an error.
    pub fn publish(&self, envelope: Envelope) -> usize {
        {
            let topics = self.topics.read();
            if let Some(sender) = topics.senders.get(&envelope.topic) {
                if !topics.latched.contains(&envelope.topic) {
                    return sender.send(envelope).unwrap_or(0);
                }
            }
        }
        let mut topics = self.topics.write();
        if topics.latched.contains(&envelope.topic) {
            topics.last.insert(envelope.topic.clone(), envelope.clone());
        }
        let capacity = self.capacity;
        let sender = topics
            .senders
            .entry(envelope.topic.clone())
            .or_insert_with(|| broadcast::channel(capacity).0);
        sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to `topic`, creating its channel if needed.
    pub fn subscribe(&self, topic: &str) -> TopicReceiver {
        let mut topics = self.topics.write();
        let capacity = self.capacity;
        let receiver = topics
            .senders
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe();
        let replay = topics.last.get(topic).cloned();
        TopicReceiver {
            topic: topic.to_string(),
            replay,
            receiver,
        }
    }

    /// `true` while at least one receiver for `topic` is alive.
    pub fn has_active_consumer(&self, topic: &str) -> bool {
        self.topics
            .read()
            .senders
            .get(topic)
            .is_some_and(|s| s.receiver_count() > 0)
    }

    /// Names of every topic that currently has at least one receiver.
    pub fn consumed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .read()
            .senders
            .iter()
            .filter(|(_, s)| s.receiver_count() > 0)
            .map(|(name, _)| name.clone())
            .collect();
        topics.sort();
        topics
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A receiver bound to a single topic.
///
/// Obtained via [`EventBus::subscribe`]. Dropping it removes the consumer.
pub struct TopicReceiver {
    topic: String,
    replay: Option<Envelope>,
    receiver: broadcast::Receiver<Envelope>,
}

impl TopicReceiver {
    /// Wait for the next message on this topic.
    ///
    /// Returns `None` once the bus is gone. A lagging receiver logs how many
    /// messages it lost and keeps going.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if let Some(env) = self.replay.take() {
            return Some(env);
        }
        loop {
            match self.receiver.recv().await {
                Ok(env) => return Some(env),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "topic receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv) for synchronous callers.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        if let Some(env) = self.replay.take() {
            return Some(env);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(env) => return Some(env),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "topic receiver lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
