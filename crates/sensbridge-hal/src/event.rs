//! [`MemoryEventSource`] – an [`AsyncEventSource`] fed by session events.
//!
//! Starting the source subscribes to its memory key and spawns a worker
//! thread. The session callback only forwards raw values into a channel; the
//! worker stamps, types and fans them out:
//!
//! 1. publish, if publishing is on and the topic has a consumer;
//! 2. write to the open container, if recording is on;
//! 3. buffer, unless a dump is in progress.
//!
//! Step 2 runs inside the driver's [`PersistGate`], so stopping a recording
//! or starting a dump waits for a write already under way.
//!
//! Stopping unsubscribes, sends a stop message and waits for the worker's
//! acknowledgement for at most the grace period.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use sensbridge_kernel::{
    AsyncEventSource, BufferedRecorder, BusPublisher, Clock, EmitSink, PersistGate, PersistSink,
};
use sensbridge_middleware::{ContainerStore, EventBus};
use sensbridge_types::{BridgeError, DataKind, MemoryValue, Timestamp};
use tracing::{debug, warn};

use crate::kind::coerce;
use crate::session::{HardwareSession, RawValue, SubscriptionId};

enum Message {
    Sample(RawValue),
    Stop,
}

struct Shared {
    name: String,
    key: String,
    kind: DataKind,
    clock: Arc<dyn Clock>,
    publisher: BusPublisher<MemoryValue>,
    recorder: BufferedRecorder<MemoryValue>,
    gate: RwLock<Arc<PersistGate>>,
    publishing: AtomicBool,
    recording: AtomicBool,
    dumping: AtomicBool,
}

impl Shared {
    fn process(&self, raw: RawValue) {
        let Some(value) = coerce(&raw, self.kind) else {
            debug!(event = %self.name, raw = %raw, "event value does not fit its kind; dropped");
            return;
        };
        let stamp = self.clock.now();
        let message = MemoryValue {
            stamp,
            key: self.key.clone(),
            value,
        };
        if self.publishing.load(Ordering::SeqCst) && self.publisher.is_consumed() {
            if let Err(e) = self.publisher.publish(stamp, &message) {
                warn!(event = %self.name, error = %e, "event emit failed");
            }
        }
        let gate = Arc::clone(&self.gate.read());
        gate.commit(|| {
            if !self.recording.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = self.recorder.write(stamp, &message) {
                warn!(event = %self.name, error = %e, "event persist failed");
            }
        });
        if !self.dumping.load(Ordering::SeqCst) {
            self.recorder.buffer(stamp, message);
        }
    }
}

struct Worker {
    subscription: SubscriptionId,
    stop: mpsc::Sender<Message>,
    done: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Event source for one memory key of a [`HardwareSession`].
pub struct MemoryEventSource {
    session: Arc<dyn HardwareSession>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl MemoryEventSource {
    /// Source named and published after `key`.
    ///
    /// `kind` must already be resolved; see [`crate::kind::resolve_kind`].
    pub fn new(session: Arc<dyn HardwareSession>, key: &str, kind: DataKind, clock: Arc<dyn Clock>) -> Self {
        Self::named(session, key, key, kind, clock)
    }

    /// Source registered and published as `name` while listening to `key`.
    pub fn named(
        session: Arc<dyn HardwareSession>,
        name: &str,
        key: &str,
        kind: DataKind,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            shared: Arc::new(Shared {
                name: name.to_string(),
                key: key.to_string(),
                kind,
                clock,
                publisher: BusPublisher::new(name),
                recorder: BufferedRecorder::new(name),
                gate: RwLock::new(Arc::new(PersistGate::new())),
                publishing: AtomicBool::new(false),
                recording: AtomicBool::new(false),
                dumping: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn buffered(&self) -> usize {
        self.shared.recorder.buffered()
    }
}

impl AsyncEventSource for MemoryEventSource {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn start_processing(&self) -> Result<(), BridgeError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let key = self.shared.key.clone();
        let name = self.shared.name.clone();
        let start_failed = |details: String| BridgeError::BackgroundStartFailed {
            name: name.clone(),
            details,
        };

        let (tx, rx) = mpsc::channel::<Message>();
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("event-{name}"))
            .spawn(move || {
                while let Ok(Message::Sample(raw)) = rx.recv() {
                    shared.process(raw);
                }
                let _ = done_tx.send(());
            })
            .map_err(|e| start_failed(e.to_string()))?;

        let forward = tx.clone();
        let subscription = match self.session.subscribe(
            &key,
            Box::new(move |raw| {
                let _ = forward.send(Message::Sample(raw));
            }),
        ) {
            Ok(id) => id,
            Err(e) => {
                let _ = tx.send(Message::Stop);
                let _ = handle.join();
                return Err(start_failed(e.to_string()));
            }
        };

        *worker = Some(Worker {
            subscription,
            stop: tx,
            done: done_rx,
            handle,
        });
        debug!(event = %name, key = %key, "event source started");
        Ok(())
    }

    fn stop_processing(&self, grace: Duration) -> Result<(), BridgeError> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        if let Err(e) = self.session.unsubscribe(worker.subscription) {
            warn!(event = %self.shared.name, error = %e, "unsubscribe failed");
        }
        let _ = worker.stop.send(Message::Stop);
        match worker.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::StopTimedOut {
                name: self.shared.name.clone(),
                grace_ms: u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn is_processing(&self) -> bool {
        self.worker.lock().is_some()
    }

    fn set_publishing(&self, publishing: bool) {
        self.shared.publishing.store(publishing, Ordering::SeqCst);
    }

    fn set_recording(&self, recording: bool) {
        self.shared.recording.store(recording, Ordering::SeqCst);
    }

    fn set_dumping(&self, dumping: bool) {
        self.shared.dumping.store(dumping, Ordering::SeqCst);
    }

    fn is_dumping(&self) -> bool {
        self.shared.dumping.load(Ordering::SeqCst)
    }

    fn rebind(&self, bus: &EventBus) {
        self.shared.publisher.rebind(bus);
    }

    fn bind(&self, store: Arc<dyn ContainerStore>, gate: Arc<PersistGate>) {
        self.shared.recorder.bind(store, 0.0);
        *self.shared.gate.write() = gate;
    }

    fn set_buffer_horizon(&self, horizon: Duration) {
        self.shared.recorder.set_buffer_horizon(horizon);
    }

    fn write_dump(&self, snapshot: Timestamp) -> Result<usize, BridgeError> {
        self.shared.recorder.write_dump(snapshot)
    }
}

impl Drop for MemoryEventSource {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = self.session.unsubscribe(worker.subscription);
            let _ = worker.stop.send(Message::Stop);
        }
    }
}
