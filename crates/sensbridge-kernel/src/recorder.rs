//! [`BufferedRecorder`] – the standard [`PersistSink`].
//!
//! Continuous recording appends straight to the shared container store. The
//! dump buffer is a deque of stamped messages bounded two ways: anything older
//! than the horizon (relative to the newest sample) is evicted, and once the
//! feeding task's frequency is known the deque never grows past
//! `ceil(horizon × frequency) + 1` entries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sensbridge_middleware::ContainerStore;
use sensbridge_types::{BridgeError, Envelope, Timestamp};

use crate::sink::PersistSink;

struct RecordBuffer<M> {
    samples: VecDeque<(Timestamp, M)>,
    horizon: Duration,
    frequency: f64,
}

impl<M> RecordBuffer<M> {
    fn capacity(&self) -> Option<usize> {
        (self.frequency > 0.0)
            .then(|| (self.horizon.as_secs_f64() * self.frequency).ceil() as usize + 1)
    }

    fn evict(&mut self) {
        if let Some(&(newest, _)) = self.samples.back() {
            while let Some(&(oldest, _)) = self.samples.front() {
                if oldest + self.horizon >= newest {
                    break;
                }
                self.samples.pop_front();
            }
        }
        if let Some(capacity) = self.capacity() {
            while self.samples.len() > capacity {
                self.samples.pop_front();
            }
        }
    }
}

/// Recorder for messages of type `M`, keyed by its topic.
pub struct BufferedRecorder<M> {
    topic: String,
    subscribed: AtomicBool,
    store: RwLock<Option<Arc<dyn ContainerStore>>>,
    buffer: Mutex<RecordBuffer<M>>,
}

impl<M> BufferedRecorder<M>
where
    M: Serialize + Send + 'static,
{
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            subscribed: AtomicBool::new(false),
            store: RwLock::new(None),
            buffer: Mutex::new(RecordBuffer {
                samples: VecDeque::new(),
                horizon: Duration::from_secs(10),
                frequency: 0.0,
            }),
        }
    }

    fn bound_store(&self) -> Result<Arc<dyn ContainerStore>, BridgeError> {
        self.store
            .read()
            .clone()
            .ok_or_else(|| BridgeError::Storage(format!("{}: recorder is not bound", self.topic)))
    }

    /// Append one message to the open recording container.
    pub fn write(&self, stamp: Timestamp, message: &M) -> Result<(), BridgeError> {
        let store = self.bound_store()?;
        store.append(&Envelope::new(&self.topic, stamp, message)?)
    }

    /// Keep `message` for a later dump.
    pub fn buffer(&self, stamp: Timestamp, message: M) {
        let mut buffer = self.buffer.lock();
        buffer.samples.push_back((stamp, message));
        buffer.evict();
    }

    /// Stamps of the buffered samples, oldest first.
    pub fn buffered_stamps(&self) -> Vec<Timestamp> {
        self.buffer.lock().samples.iter().map(|(stamp, _)| *stamp).collect()
    }
}

impl<M> PersistSink for BufferedRecorder<M>
where
    M: Serialize + Send + 'static,
{
    fn topic(&self) -> &str {
        &self.topic
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::SeqCst);
    }

    fn bind(&self, store: Arc<dyn ContainerStore>, frequency: f64) {
        *self.store.write() = Some(store);
        let mut buffer = self.buffer.lock();
        buffer.frequency = frequency;
        buffer.evict();
    }

    fn set_buffer_horizon(&self, horizon: Duration) {
        let mut buffer = self.buffer.lock();
        buffer.horizon = horizon;
        buffer.evict();
    }

    /// The buffer lock is held for the whole flush, so a concurrent `buffer`
    /// lands either entirely before or entirely after the snapshot. The
    /// buffer is left intact.
    fn write_dump(&self, snapshot: Timestamp) -> Result<usize, BridgeError> {
        let store = self.bound_store()?;
        let buffer = self.buffer.lock();
        let mut written = 0;
        for (stamp, message) in &buffer.samples {
            if *stamp + buffer.horizon < snapshot {
                continue;
            }
            store.append(&Envelope::new(&self.topic, *stamp, message)?)?;
            written += 1;
        }
        Ok(written)
    }

    fn buffered(&self) -> usize {
        self.buffer.lock().samples.len()
    }
}
