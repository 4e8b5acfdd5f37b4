//! Mock tasks and sinks shared by the kernel's unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sensbridge_middleware::{ContainerStore, EventBus};
use sensbridge_types::{Action, BridgeError, Envelope, Timestamp};

use crate::clock::ManualClock;
use crate::gate::PersistGate;
use crate::sink::{AsyncEventSource, EmitSink, InboundSubscriber, PersistSink};
use crate::task::{Dispatch, Task};

// ────────────────────────────────────────────────────────────────────────────
// Probe task
// ────────────────────────────────────────────────────────────────────────────

/// Task that logs every dispatch it receives.
pub struct Probe {
    name: String,
    frequency: f64,
    log: Arc<Mutex<Vec<Dispatch>>>,
    work: Option<(Arc<ManualClock>, Vec<u64>)>,
    target: Option<Arc<FakeRecorder>>,
    panics: bool,
}

impl Probe {
    pub fn new(name: &str, frequency: f64) -> Self {
        Self {
            name: name.to_string(),
            frequency,
            log: Arc::new(Mutex::new(Vec::new())),
            work: None,
            target: None,
            panics: false,
        }
    }

    /// Each invocation advances `clock` by the next of `millis`, cycling.
    pub fn with_work(mut self, clock: Arc<ManualClock>, millis: &[u64]) -> Self {
        self.work = Some((clock, millis.to_vec()));
        self
    }

    /// `Persist` dispatches count as writes on `recorder`.
    pub fn writing_to(mut self, recorder: Arc<FakeRecorder>) -> Self {
        self.target = Some(recorder);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn log(&self) -> Arc<Mutex<Vec<Dispatch>>> {
        Arc::clone(&self.log)
    }
}

impl Task for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn invoke(&mut self, dispatch: &Dispatch) {
        if self.panics {
            panic!("probe {} exploded", self.name);
        }
        let mut log = self.log.lock();
        if let Some((clock, millis)) = &self.work {
            clock.advance(Duration::from_millis(millis[log.len() % millis.len()]));
        }
        if dispatch.actions.contains(Action::Persist) {
            if let Some(target) = &self.target {
                target.writes.fetch_add(1, Ordering::SeqCst);
            }
        }
        log.push(*dispatch);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Emit sink
// ────────────────────────────────────────────────────────────────────────────

pub struct FakeEmitter {
    topic: String,
    consumed: bool,
    rebinds: AtomicUsize,
}

impl FakeEmitter {
    pub fn consumed(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            consumed: true,
            rebinds: AtomicUsize::new(0),
        }
    }

    pub fn idle(topic: &str) -> Self {
        Self {
            consumed: false,
            ..Self::consumed(topic)
        }
    }

    pub fn rebinds(&self) -> usize {
        self.rebinds.load(Ordering::SeqCst)
    }
}

impl EmitSink for FakeEmitter {
    fn topic(&self) -> &str {
        &self.topic
    }
    fn is_consumed(&self) -> bool {
        self.consumed
    }
    fn rebind(&self, _bus: &EventBus) {
        self.rebinds.fetch_add(1, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Persist sink
// ────────────────────────────────────────────────────────────────────────────

/// Recorder whose buffer is a list of stamps; dumps write one envelope per
/// stamp into the bound store.
pub struct FakeRecorder {
    topic: String,
    subscribed: AtomicBool,
    writes: AtomicUsize,
    horizon: Mutex<Duration>,
    samples: Mutex<Vec<u64>>,
    store: Mutex<Option<Arc<dyn ContainerStore>>>,
    fail_dump: bool,
}

impl FakeRecorder {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            subscribed: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            horizon: Mutex::new(Duration::ZERO),
            samples: Mutex::new(Vec::new()),
            store: Mutex::new(None),
            fail_dump: false,
        }
    }

    pub fn failing(topic: &str) -> Self {
        Self {
            fail_dump: true,
            ..Self::new(topic)
        }
    }

    pub fn with_samples(self, stamps: &[u64]) -> Self {
        self.samples.lock().extend_from_slice(stamps);
        self
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn horizon(&self) -> Duration {
        *self.horizon.lock()
    }
}

impl PersistSink for FakeRecorder {
    fn topic(&self) -> &str {
        &self.topic
    }
    fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }
    fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::SeqCst);
    }
    fn bind(&self, store: Arc<dyn ContainerStore>, _frequency: f64) {
        *self.store.lock() = Some(store);
    }
    fn set_buffer_horizon(&self, horizon: Duration) {
        *self.horizon.lock() = horizon;
    }
    fn write_dump(&self, _snapshot: Timestamp) -> Result<usize, BridgeError> {
        if self.fail_dump {
            return Err(BridgeError::Storage(format!("{}: injected flush failure", self.topic)));
        }
        write_stamps(&self.topic, &self.store, &self.samples.lock())
    }
    fn buffered(&self) -> usize {
        self.samples.lock().len()
    }
}

fn write_stamps(
    topic: &str,
    store: &Mutex<Option<Arc<dyn ContainerStore>>>,
    stamps: &[u64],
) -> Result<usize, BridgeError> {
    let store = store
        .lock()
        .clone()
        .ok_or_else(|| BridgeError::Storage(format!("{topic}: unbound")))?;
    for &n in stamps {
        store.append(&Envelope::new(topic, Timestamp::from_nanos(n), &n)?)?;
    }
    Ok(stamps.len())
}

// ────────────────────────────────────────────────────────────────────────────
// Event source
// ────────────────────────────────────────────────────────────────────────────

pub struct FakeEventSource {
    name: String,
    processing: AtomicBool,
    publishing: AtomicBool,
    recording: AtomicBool,
    dumping: AtomicBool,
    dumping_during_flush: AtomicBool,
    rebinds: AtomicUsize,
    horizon: Mutex<Duration>,
    samples: Mutex<Vec<u64>>,
    store: Mutex<Option<Arc<dyn ContainerStore>>>,
    gate: Mutex<Option<Arc<PersistGate>>>,
    fail_start: bool,
    stuck: bool,
}

impl FakeEventSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            processing: AtomicBool::new(false),
            publishing: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            dumping: AtomicBool::new(false),
            dumping_during_flush: AtomicBool::new(false),
            rebinds: AtomicUsize::new(0),
            horizon: Mutex::new(Duration::ZERO),
            samples: Mutex::new(Vec::new()),
            store: Mutex::new(None),
            gate: Mutex::new(None),
            fail_start: false,
            stuck: false,
        }
    }

    pub fn failing_start(self) -> Self {
        Self {
            fail_start: true,
            ..self
        }
    }

    /// Never acknowledges a stop request.
    pub fn stuck(self) -> Self {
        Self { stuck: true, ..self }
    }

    pub fn with_samples(self, stamps: &[u64]) -> Self {
        self.samples.lock().extend_from_slice(stamps);
        self
    }

    pub fn publishing(&self) -> bool {
        self.publishing.load(Ordering::SeqCst)
    }

    pub fn recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn was_dumping_during_flush(&self) -> bool {
        self.dumping_during_flush.load(Ordering::SeqCst)
    }

    pub fn rebinds(&self) -> usize {
        self.rebinds.load(Ordering::SeqCst)
    }

    pub fn horizon(&self) -> Duration {
        *self.horizon.lock()
    }

    /// Commit one live sample the way a worker does: under the persist gate
    /// and only while recording. `during` runs inside the gate, just before
    /// the write. Returns whether the sample was written.
    pub fn commit_live(&self, stamp: u64, during: impl FnOnce()) -> Result<bool, BridgeError> {
        let gate = self
            .gate
            .lock()
            .clone()
            .ok_or_else(|| BridgeError::Storage(format!("{}: unbound", self.name)))?;
        gate.commit(|| {
            if !self.recording() {
                return Ok(false);
            }
            during();
            write_stamps(&self.name, &self.store, &[stamp]).map(|_| true)
        })
    }
}

impl AsyncEventSource for FakeEventSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_processing(&self) -> Result<(), BridgeError> {
        if self.fail_start {
            return Err(BridgeError::BackgroundStartFailed {
                name: self.name.clone(),
                details: "injected".into(),
            });
        }
        self.processing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_processing(&self, grace: Duration) -> Result<(), BridgeError> {
        if self.stuck {
            return Err(BridgeError::StopTimedOut {
                name: self.name.clone(),
                grace_ms: grace.as_millis() as u64,
            });
        }
        self.processing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    fn set_publishing(&self, publishing: bool) {
        self.publishing.store(publishing, Ordering::SeqCst);
    }

    fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    fn set_dumping(&self, dumping: bool) {
        self.dumping.store(dumping, Ordering::SeqCst);
    }

    fn is_dumping(&self) -> bool {
        self.dumping.load(Ordering::SeqCst)
    }

    fn rebind(&self, _bus: &EventBus) {
        self.rebinds.fetch_add(1, Ordering::SeqCst);
    }

    fn bind(&self, store: Arc<dyn ContainerStore>, gate: Arc<PersistGate>) {
        *self.store.lock() = Some(store);
        *self.gate.lock() = Some(gate);
    }

    fn set_buffer_horizon(&self, horizon: Duration) {
        *self.horizon.lock() = horizon;
    }

    fn write_dump(&self, _snapshot: Timestamp) -> Result<usize, BridgeError> {
        self.dumping_during_flush
            .store(self.is_dumping(), Ordering::SeqCst);
        write_stamps(&self.name, &self.store, &self.samples.lock())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Inbound subscriber
// ────────────────────────────────────────────────────────────────────────────

pub struct FakeSubscriber {
    name: String,
    subscribed: AtomicBool,
    resets: AtomicUsize,
    fail_reset: bool,
}

impl FakeSubscriber {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribed: AtomicBool::new(false),
            resets: AtomicUsize::new(0),
            fail_reset: false,
        }
    }

    pub fn failing_reset(self) -> Self {
        Self {
            fail_reset: true,
            ..self
        }
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl InboundSubscriber for FakeSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn topic(&self) -> &str {
        &self.name
    }

    fn reset(&self, _bus: &EventBus) -> Result<(), BridgeError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reset {
            return Err(BridgeError::BackgroundStartFailed {
                name: self.name.clone(),
                details: "injected".into(),
            });
        }
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.subscribed.store(false, Ordering::SeqCst);
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }
}
