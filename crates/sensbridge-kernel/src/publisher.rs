//! [`BusPublisher`] – the standard [`EmitSink`], publishing onto the
//! session's [`EventBus`].

use std::marker::PhantomData;

use parking_lot::RwLock;
use serde::Serialize;
use sensbridge_middleware::EventBus;
use sensbridge_types::{BridgeError, Envelope, Timestamp};

use crate::sink::EmitSink;

pub struct BusPublisher<M> {
    topic: String,
    latched: bool,
    bus: RwLock<Option<EventBus>>,
    _message: PhantomData<fn(&M)>,
}

impl<M: Serialize> BusPublisher<M> {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            latched: false,
            bus: RwLock::new(None),
            _message: PhantomData,
        }
    }

    /// A publisher whose last message is kept for late subscribers. It
    /// always counts as consumed.
    pub fn latched(topic: &str) -> Self {
        Self {
            latched: true,
            ..Self::new(topic)
        }
    }

    /// Publish `message`; returns how many receivers got it. Publishing
    /// before the first bind is a no-op.
    pub fn publish(&self, stamp: Timestamp, message: &M) -> Result<usize, BridgeError> {
        let Some(bus) = self.bus.read().clone() else {
            return Ok(0);
        };
        Ok(bus.publish(Envelope::new(&self.topic, stamp, message)?))
    }
}

impl<M: Serialize> EmitSink for BusPublisher<M> {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn is_consumed(&self) -> bool {
        match &*self.bus.read() {
            Some(bus) => self.latched || bus.has_active_consumer(&self.topic),
            None => false,
        }
    }

    fn rebind(&self, bus: &EventBus) {
        if self.latched {
            bus.latch(&self.topic);
        }
        *self.bus.write() = Some(bus.clone());
    }
}
