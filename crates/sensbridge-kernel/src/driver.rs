//! [`Driver`] – the state every bridge operation goes through.
//!
//! The driver owns the [`Schedule`], the three sink registries, the global
//! delivery flags and the run/stop state. It is shared behind an `Arc`
//! between the scheduler thread (which calls [`Driver::run`] or
//! [`Driver::tick`]) and whatever front-end toggles flags or requests dumps.
//!
//! # Locks
//!
//! | Lock       | Guards                                         | Scheduler takes it |
//! |------------|------------------------------------------------|--------------------|
//! | `schedule` | task list and dispatch queue                   | blocking           |
//! | `sinks`    | emit, persist, event and inbound registries    | blocking, briefly  |
//! | `persist`  | the recording flag and every committed write   | `try_lock` only    |
//!
//! `persist` is a [`PersistGate`] shared with every event source, whose
//! workers take it around their own committed writes.
//!
//! Acquisition order is `schedule` → `sinks`, and `persist` → `sinks`. The
//! scheduler only ever *tries* `persist`, so it can never stall behind a dump
//! or a recording toggle; it skips the `Persist` action for that tick instead.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use sensbridge_middleware::{ContainerStore, EventBus};
use sensbridge_types::{Action, ActionSet, BridgeError, ContainerId, Timestamp};
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::gate::{PersistGate, PersistState};
use crate::registry::NamedTable;
use crate::schedule::{Schedule, ScheduledTask, validate_frequency};
use crate::sink::{AsyncEventSource, EmitSink, InboundSubscriber, PersistSink};
use crate::task::{Dispatch, Task};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables of the scheduler and the dump coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// How long an empty scheduler sleeps before looking again.
    pub idle_interval: Duration,
    /// Longest single sleep; a stop request is noticed within one slice.
    pub sleep_slice: Duration,
    /// How long each event source gets to stop on shutdown.
    pub stop_grace: Duration,
    /// Dumps are refused once the container store uses this many bytes.
    pub storage_limit: u64,
    /// Initial buffer horizon of every persist sink and event source.
    pub buffer_horizon: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(1),
            sleep_slice: Duration::from_millis(50),
            stop_grace: Duration::from_secs(2),
            storage_limit: 2 * 1024 * 1024 * 1024,
            buffer_horizon: Duration::from_secs(10),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct Sinks {
    pub(crate) emit: NamedTable<Arc<dyn EmitSink>>,
    pub(crate) persist: NamedTable<Arc<dyn PersistSink>>,
    pub(crate) events: NamedTable<Arc<dyn AsyncEventSource>>,
    pub(crate) subscribers: NamedTable<Arc<dyn InboundSubscriber>>,
}

/// What one call to [`Driver::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was queued; the idle interval was slept.
    Idle,
    /// The earliest queued slot was dispatched. `actions` may be empty, in
    /// which case the task was not invoked.
    Dispatched {
        task: String,
        fire_time: Timestamp,
        actions: ActionSet,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Driver
// ────────────────────────────────────────────────────────────────────────────

/// Scheduler, registries and lifecycle in one place.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sensbridge_kernel::clock::ManualClock;
/// use sensbridge_kernel::driver::{Driver, DriverConfig, TickOutcome};
/// use sensbridge_middleware::{EventBus, MemoryContainerStore};
///
/// let driver = Driver::new(
///     Arc::new(ManualClock::new()),
///     Arc::new(MemoryContainerStore::new()),
///     EventBus::default(),
///     DriverConfig::default(),
/// );
/// assert_eq!(driver.tick(), TickOutcome::Idle);
/// ```
pub struct Driver {
    clock: Arc<dyn Clock>,
    pub(crate) config: DriverConfig,
    pub(crate) store: Arc<dyn ContainerStore>,
    schedule: Mutex<Schedule>,
    pub(crate) persist: Arc<PersistGate>,
    pub(crate) sinks: RwLock<Sinks>,
    bus: RwLock<EventBus>,
    emit_enabled: AtomicBool,
    pub(crate) buffer_enabled: AtomicBool,
    running: AtomicBool,
    terminated: AtomicBool,
    horizon: Mutex<Duration>,
}

impl Driver {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn ContainerStore>,
        bus: EventBus,
        config: DriverConfig,
    ) -> Self {
        let horizon = config.buffer_horizon;
        Self {
            clock,
            config,
            store,
            schedule: Mutex::new(Schedule::new()),
            persist: Arc::new(PersistGate::new()),
            sinks: RwLock::new(Sinks::default()),
            bus: RwLock::new(bus),
            emit_enabled: AtomicBool::new(false),
            buffer_enabled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            horizon: Mutex::new(horizon),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The bus emit sinks are currently bound to.
    pub fn bus(&self) -> EventBus {
        self.bus.read().clone()
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Append a periodic task and seed its first dispatch at `now`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::DuplicateName`] if a task or an event source already
    ///   uses the name.
    /// - [`BridgeError::Config`] for a negative or non-finite frequency.
    pub fn register_task(&self, task: Box<dyn Task>) -> Result<usize, BridgeError> {
        let name = task.name().to_string();
        validate_frequency(&name, task.frequency())?;
        let mut schedule = self.schedule.lock();
        if schedule.contains_name(&name) || self.sinks.read().events.contains(&name) {
            return Err(BridgeError::DuplicateName(name));
        }
        let frequency = task.frequency();
        let index = schedule.push_task(task, self.clock.now());
        debug!(task = %name, index, frequency, "task registered");
        Ok(index)
    }

    /// Register a task together with its sinks, all under the task's name.
    ///
    /// Every name is checked first; on `DuplicateName` nothing is inserted.
    pub fn register_converter(
        &self,
        task: Box<dyn Task>,
        emit: Option<Arc<dyn EmitSink>>,
        persist: Option<Arc<dyn PersistSink>>,
    ) -> Result<usize, BridgeError> {
        let name = task.name().to_string();
        let frequency = task.frequency();
        validate_frequency(&name, frequency)?;

        let mut schedule = self.schedule.lock();
        let mut sinks = self.sinks.write();
        let taken = schedule.contains_name(&name)
            || sinks.events.contains(&name)
            || (emit.is_some() && sinks.emit.contains(&name))
            || (persist.is_some() && sinks.persist.contains(&name));
        if taken {
            return Err(BridgeError::DuplicateName(name));
        }

        if let Some(sink) = emit {
            sink.rebind(&self.bus.read());
            sinks.emit.insert(&name, sink)?;
        }
        if let Some(sink) = persist {
            sink.bind(Arc::clone(&self.store), frequency);
            sink.set_buffer_horizon(*self.horizon.lock());
            sinks.persist.insert(&name, sink)?;
        }
        drop(sinks);
        let index = schedule.push_task(task, self.clock.now());
        debug!(task = %name, index, frequency, "converter registered");
        Ok(index)
    }

    /// Register the live sink of task `name` and bind it to the current bus.
    pub fn register_emit_sink(&self, name: &str, sink: Arc<dyn EmitSink>) -> Result<(), BridgeError> {
        let mut sinks = self.sinks.write();
        sinks.emit.insert(name, Arc::clone(&sink))?;
        sink.rebind(&self.bus.read());
        debug!(sink = %name, topic = %sink.topic(), "emit sink registered");
        Ok(())
    }

    /// Register the recorder of task `name`, bind it to the container store
    /// and apply the current buffer horizon.
    pub fn register_persist_sink(
        &self,
        name: &str,
        sink: Arc<dyn PersistSink>,
        frequency: f64,
    ) -> Result<(), BridgeError> {
        validate_frequency(name, frequency)?;
        let mut sinks = self.sinks.write();
        sinks.persist.insert(name, Arc::clone(&sink))?;
        sink.bind(Arc::clone(&self.store), frequency);
        sink.set_buffer_horizon(*self.horizon.lock());
        debug!(sink = %name, frequency, "persist sink registered");
        Ok(())
    }

    /// Register an event-driven source. On a running driver its background
    /// processing starts immediately and picks up the current emit flag.
    ///
    /// A source that fails to start stays registered but inert; the failure
    /// is logged, not returned.
    pub fn register_async_event(
        &self,
        name: &str,
        source: Arc<dyn AsyncEventSource>,
    ) -> Result<(), BridgeError> {
        {
            let schedule = self.schedule.lock();
            let mut sinks = self.sinks.write();
            if schedule.contains_name(name) {
                return Err(BridgeError::DuplicateName(name.to_string()));
            }
            sinks.events.insert(name, Arc::clone(&source))?;
        }
        source.rebind(&self.bus.read());
        source.bind(Arc::clone(&self.store), Arc::clone(&self.persist));
        source.set_buffer_horizon(*self.horizon.lock());
        if self.is_running() {
            start_source(name, source.as_ref());
            source.set_publishing(self.is_emit_enabled());
        }
        debug!(source = %name, "event source registered");
        Ok(())
    }

    /// Register an inbound subscriber and attach it to the current bus.
    ///
    /// Registering the very same subscriber again only re-attaches it.
    /// A subscriber that fails to attach stays registered but inert, like an
    /// event source that fails to start; [`rebind_session`](Self::rebind_session)
    /// retries it.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DuplicateName`] when another subscriber uses the name.
    pub fn register_subscriber(&self, subscriber: Arc<dyn InboundSubscriber>) -> Result<(), BridgeError> {
        let name = subscriber.name().to_string();
        let mut sinks = self.sinks.write();
        let same = sinks.subscribers.get(&name).map(|existing| Arc::ptr_eq(existing, &subscriber));
        match same {
            Some(true) => info!(subscriber = %name, "re-initializing existing subscriber"),
            Some(false) => return Err(BridgeError::DuplicateName(name)),
            None => sinks.subscribers.insert(&name, Arc::clone(&subscriber))?,
        }
        attach_subscriber(&name, subscriber.as_ref(), &self.bus.read());
        debug!(subscriber = %name, topic = %subscriber.topic(), "inbound subscriber registered");
        Ok(())
    }

    // ── Scheduler ───────────────────────────────────────────────────────────

    /// Dispatch the earliest queued slot, or idle when nothing is queued.
    ///
    /// The task is invoked right away with the actions that apply now; the
    /// call then sleeps until the slot's fire time so the loop never runs
    /// ahead of schedule. The next slot is always `fire_time + period`,
    /// independent of how long the invocation took.
    pub fn tick(&self) -> TickOutcome {
        let (task, fire_time, actions) = {
            let mut schedule = self.schedule.lock();
            let Some(slot) = schedule.pop() else {
                drop(schedule);
                self.nap(self.config.idle_interval);
                return TickOutcome::Idle;
            };
            let (task, actions) = self.dispatch(&mut schedule, slot);
            if schedule.reschedule(slot).is_none() {
                trace!(task = %task, "one-shot task retired");
            }
            (task, slot.fire_time, actions)
        };

        let wait = fire_time.saturating_since(self.clock.now());
        if !wait.is_zero() {
            self.nap(wait);
        }
        TickOutcome::Dispatched {
            task,
            fire_time,
            actions,
        }
    }

    /// Work out the action set for `slot` and invoke its task.
    fn dispatch(&self, schedule: &mut Schedule, slot: ScheduledTask) -> (String, ActionSet) {
        let Some(task) = schedule.task_mut(slot.task_index) else {
            return (String::new(), ActionSet::empty());
        };
        let name = task.name().to_string();
        let (emit, persist) = {
            let sinks = self.sinks.read();
            (sinks.emit.get(&name).cloned(), sinks.persist.get(&name).cloned())
        };

        let mut actions = ActionSet::empty();
        if self.is_emit_enabled() && emit.is_some_and(|sink| sink.is_consumed()) {
            actions.insert(Action::Emit);
        }

        // Held until the invocation returns so no dump or recording toggle
        // can slip between the decision and the write.
        let persist_guard = self.persist.try_lock();
        let persisting = match (&persist_guard, &persist) {
            (Some(state), Some(sink)) => state.container.is_some() && sink.is_subscribed(),
            (None, Some(_)) => {
                trace!(task = %name, "persist lock contended; skipping persist");
                false
            }
            _ => false,
        };
        let persist_guard = persist_guard.filter(|_| persisting);
        if persisting {
            actions.insert(Action::Persist);
        }

        if self.is_buffering() && persist.is_some() && task.frequency() != 0.0 {
            actions.insert(Action::Buffer);
        }

        if !actions.is_empty() {
            let dispatch = Dispatch {
                fire_time: slot.fire_time,
                actions,
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| task.invoke(&dispatch)));
            if result.is_err() {
                error!(task = %name, "task panicked during dispatch; continuing");
            }
        }
        drop(persist_guard);
        (name, actions)
    }

    /// Sleep `total` in bounded slices, returning early once stopped.
    fn nap(&self, total: Duration) {
        let slice = self.config.sleep_slice.max(Duration::from_millis(1));
        let mut remaining = total;
        while !remaining.is_zero() && !self.terminated.load(Ordering::SeqCst) {
            let step = remaining.min(slice);
            self.clock.sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }

    /// Tick until [`stop`](Self::stop) is called.
    pub fn run(&self) {
        info!("scheduler loop started");
        while self.is_running() {
            self.tick();
        }
        info!("scheduler loop finished");
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Move to `Running` and start every registered event source.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Terminated`] once [`stop`](Self::stop) has run.
    pub fn start(&self) -> Result<(), BridgeError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(BridgeError::Terminated);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let emit = self.is_emit_enabled();
        for (name, source) in self.event_sources() {
            start_source(&name, source.as_ref());
            source.set_publishing(emit);
        }
        info!(tasks = self.schedule.lock().task_count(), "driver running");
        Ok(())
    }

    /// Stop for good: end recording, stop every event source within the
    /// configured grace period and clear all registries.
    ///
    /// Sources that overrun their grace period are logged and abandoned.
    pub fn stop(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);

        if let Err(e) = self.stop_recording() {
            warn!(error = %e, "failed to close recording on shutdown");
        }
        for subscriber in self.sinks.read().subscribers.values() {
            subscriber.shutdown();
        }
        let grace = self.config.stop_grace;
        for (name, source) in self.event_sources() {
            match source.stop_processing(grace) {
                Ok(()) => debug!(source = %name, "event source stopped"),
                Err(e) => error!(source = %name, error = %e, "event source did not stop cleanly"),
            }
        }

        self.schedule.lock().clear();
        let mut sinks = self.sinks.write();
        sinks.emit.clear();
        sinks.persist.clear();
        sinks.events.clear();
        sinks.subscribers.clear();
        info!("driver stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    // ── Flags ───────────────────────────────────────────────────────────────

    pub fn enable_emit(&self) {
        self.set_emit(true);
    }

    pub fn disable_emit(&self) {
        self.set_emit(false);
    }

    fn set_emit(&self, enabled: bool) {
        self.emit_enabled.store(enabled, Ordering::SeqCst);
        for (_, source) in self.event_sources() {
            source.set_publishing(enabled);
        }
        info!(enabled, "emit toggled");
    }

    pub fn is_emit_enabled(&self) -> bool {
        self.emit_enabled.load(Ordering::SeqCst)
    }

    pub fn enable_buffering(&self) {
        self.buffer_enabled.store(true, Ordering::SeqCst);
        info!("buffering enabled");
    }

    pub fn disable_buffering(&self) {
        self.buffer_enabled.store(false, Ordering::SeqCst);
        info!("buffering disabled");
    }

    pub fn is_buffering(&self) -> bool {
        self.buffer_enabled.load(Ordering::SeqCst)
    }

    /// Change the buffer horizon of every persist sink and event source.
    pub fn set_buffer_horizon(&self, horizon: Duration) {
        *self.horizon.lock() = horizon;
        let sinks = self.sinks.read();
        for sink in sinks.persist.values() {
            sink.set_buffer_horizon(horizon);
        }
        for source in sinks.events.values() {
            source.set_buffer_horizon(horizon);
        }
        info!(horizon_secs = horizon.as_secs_f64(), "buffer horizon set");
    }

    pub fn buffer_horizon(&self) -> Duration {
        *self.horizon.lock()
    }

    // ── Recording ───────────────────────────────────────────────────────────

    /// Start continuous recording of every persist sink and event source, or
    /// only of `names`.
    ///
    /// Recording into an already-open container just widens the selection.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::NoMatchingSinks`] if `names` matches nothing.
    /// - Storage errors from opening the container.
    pub fn start_recording(&self, names: Option<&[String]>) -> Result<ContainerId, BridgeError> {
        let mut state = self.persist.lock();
        let sinks = self.sinks.read();

        let mut recorders = Vec::new();
        let mut sources = Vec::new();
        match names {
            None => {
                recorders.extend(sinks.persist.values().cloned());
                sources.extend(sinks.events.values().cloned());
            }
            Some(names) => {
                for name in names {
                    if let Some(sink) = sinks.persist.get(name) {
                        recorders.push(Arc::clone(sink));
                    } else if let Some(source) = sinks.events.get(name) {
                        sources.push(Arc::clone(source));
                    } else {
                        warn!(name = %name, "no recorder under this name; skipped");
                    }
                }
                if recorders.is_empty() && sources.is_empty() {
                    return Err(BridgeError::NoMatchingSinks);
                }
            }
        }

        let container = match &state.container {
            Some(id) => id.clone(),
            None => self.store.open("")?,
        };
        for sink in &recorders {
            sink.set_subscribed(true);
        }
        for source in &sources {
            source.set_recording(true);
        }
        state.container = Some(container.clone());
        info!(
            container = %container,
            recorders = recorders.len(),
            events = sources.len(),
            "recording started"
        );
        Ok(container)
    }

    /// Stop continuous recording, unsubscribe everything and close the
    /// container. Returns the closed container, or `None` if nothing was
    /// being recorded.
    ///
    /// Returns only after any in-flight committed write has finished.
    pub fn stop_recording(&self) -> Result<Option<ContainerId>, BridgeError> {
        self.stop_recording_locked(&mut self.persist.lock())
    }

    /// [`stop_recording`](Self::stop_recording) for a caller already holding
    /// the persist lock.
    pub(crate) fn stop_recording_locked(
        &self,
        state: &mut PersistState,
    ) -> Result<Option<ContainerId>, BridgeError> {
        if state.container.take().is_none() {
            return Ok(None);
        }
        {
            let sinks = self.sinks.read();
            for sink in sinks.persist.values() {
                sink.set_subscribed(false);
            }
            for source in sinks.events.values() {
                source.set_recording(false);
            }
        }
        let id = self.store.close()?;
        info!(container = %id, "recording stopped");
        Ok(Some(id))
    }

    pub fn is_recording(&self) -> bool {
        self.persist.is_recording()
    }

    // ── Sessions & introspection ────────────────────────────────────────────

    /// Re-attach every emit sink, event source and inbound subscriber to
    /// `bus`. Task and sink identities are kept; only their transport changes.
    pub fn rebind_session(&self, bus: EventBus) {
        let sinks = self.sinks.read();
        for sink in sinks.emit.values() {
            sink.rebind(&bus);
        }
        for source in sinks.events.values() {
            source.rebind(&bus);
        }
        for (name, subscriber) in sinks.subscribers.iter() {
            attach_subscriber(name, subscriber.as_ref(), &bus);
        }
        *self.bus.write() = bus;
        info!(
            emit_sinks = sinks.emit.len(),
            events = sinks.events.len(),
            subscribers = sinks.subscribers.len(),
            "session rebound"
        );
    }

    /// Periodic task names in registration order, then event source names.
    pub fn list_names(&self) -> Vec<String> {
        let mut names = self.schedule.lock().names();
        names.extend(self.sinks.read().events.names().map(str::to_string));
        names
    }

    /// Topics of every emit sink that currently has a consumer.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.sinks
            .read()
            .emit
            .values()
            .filter(|sink| sink.is_consumed())
            .map(|sink| sink.topic().to_string())
            .collect()
    }

    /// Names of the registered inbound subscribers, sorted.
    pub fn subscriber_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sinks.read().subscribers.names().map(str::to_string).collect();
        names.sort();
        names
    }

    /// Number of queued slots (one per live periodic task).
    pub fn pending(&self) -> usize {
        self.schedule.lock().pending()
    }

    // ── Containers ──────────────────────────────────────────────────────────

    pub fn list_containers(&self) -> Result<Vec<ContainerId>, BridgeError> {
        self.store.list()
    }

    pub fn remove_containers(&self, ids: &[ContainerId]) -> Result<usize, BridgeError> {
        self.store.remove(ids)
    }

    pub fn remove_all_containers(&self) -> Result<usize, BridgeError> {
        self.store.remove_all()
    }

    pub fn storage_used(&self) -> Result<u64, BridgeError> {
        self.store.used_bytes()
    }

    pub(crate) fn event_sources(&self) -> Vec<(String, Arc<dyn AsyncEventSource>)> {
        self.sinks
            .read()
            .events
            .iter()
            .map(|(name, source)| (name.to_string(), Arc::clone(source)))
            .collect()
    }
}

fn start_source(name: &str, source: &dyn AsyncEventSource) {
    if let Err(e) = source.start_processing() {
        warn!(source = %name, error = %e, "event source stays inert");
    }
}

fn attach_subscriber(name: &str, subscriber: &dyn InboundSubscriber, bus: &EventBus) {
    if let Err(e) = subscriber.reset(bus) {
        warn!(subscriber = %name, error = %e, "inbound subscriber stays detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::*;
    use sensbridge_middleware::MemoryContainerStore;

    fn driver() -> (Arc<Driver>, Arc<ManualClock>, Arc<MemoryContainerStore>) {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryContainerStore::new());
        let driver = Arc::new(Driver::new(
            clock.clone(),
            store.clone(),
            EventBus::default(),
            DriverConfig::default(),
        ));
        (driver, clock, store)
    }

    fn dispatched(outcome: TickOutcome) -> (String, Timestamp, ActionSet) {
        match outcome {
            TickOutcome::Dispatched {
                task,
                fire_time,
                actions,
            } => (task, fire_time, actions),
            TickOutcome::Idle => panic!("expected a dispatch"),
        }
    }

    #[test]
    fn empty_schedule_idles_for_the_idle_interval() {
        let (driver, clock, _) = driver();
        assert_eq!(driver.tick(), TickOutcome::Idle);
        assert_eq!(clock.now(), Timestamp::ZERO + Duration::from_secs(1));
    }

    #[test]
    fn periodic_dispatch_does_not_drift() {
        let (driver, clock, _) = driver();
        let probe = Probe::new("imu", 3.0).with_work(clock.clone(), &[7, 130, 1, 250]);
        let log = probe.log();
        driver.register_task(Box::new(probe)).unwrap();
        driver.register_persist_sink("imu", Arc::new(FakeRecorder::new("imu")), 3.0).unwrap();
        driver.enable_buffering();

        for _ in 0..12 {
            driver.tick();
        }
        let stamps: Vec<u64> = log.lock().iter().map(|d| d.fire_time.as_nanos()).collect();
        assert_eq!(stamps.len(), 12);
        for pair in stamps.windows(2) {
            assert_eq!(pair[1] - pair[0], 333_333_333);
        }
    }

    #[test]
    fn one_shot_task_is_dispatched_once() {
        let (driver, _, _) = driver();
        let probe = Probe::new("info", 0.0);
        let log = probe.log();
        driver.register_task(Box::new(probe)).unwrap();
        driver.register_emit_sink("info", Arc::new(FakeEmitter::consumed("info"))).unwrap();
        driver.enable_emit();

        let (name, _, actions) = dispatched(driver.tick());
        assert_eq!(name, "info");
        assert!(actions.contains(Action::Emit));
        assert_eq!(driver.pending(), 0);
        assert_eq!(driver.tick(), TickOutcome::Idle);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn emit_selected_only_when_enabled_present_and_consumed() {
        for enabled in [false, true] {
            for present in [false, true] {
                for consumed in [false, true] {
                    let (driver, _, _) = driver();
                    driver.register_task(Box::new(Probe::new("joint", 5.0))).unwrap();
                    if present {
                        let sink = if consumed {
                            FakeEmitter::consumed("joint")
                        } else {
                            FakeEmitter::idle("joint")
                        };
                        driver.register_emit_sink("joint", Arc::new(sink)).unwrap();
                    }
                    if enabled {
                        driver.enable_emit();
                    }
                    let (_, _, actions) = dispatched(driver.tick());
                    assert_eq!(
                        actions.contains(Action::Emit),
                        enabled && present && consumed,
                        "enabled={enabled} present={present} consumed={consumed}"
                    );
                }
            }
        }
    }

    #[test]
    fn task_without_actions_is_not_invoked() {
        let (driver, _, _) = driver();
        let probe = Probe::new("laser", 10.0);
        let log = probe.log();
        driver.register_task(Box::new(probe)).unwrap();
        let (_, _, actions) = dispatched(driver.tick());
        assert!(actions.is_empty());
        assert!(log.lock().is_empty());
        assert_eq!(driver.pending(), 1);
    }

    #[test]
    fn one_shot_tasks_are_never_buffered() {
        let (driver, _, _) = driver();
        driver.register_task(Box::new(Probe::new("once", 0.0))).unwrap();
        driver.register_task(Box::new(Probe::new("often", 2.0))).unwrap();
        driver.register_persist_sink("once", Arc::new(FakeRecorder::new("once")), 0.0).unwrap();
        driver.register_persist_sink("often", Arc::new(FakeRecorder::new("often")), 2.0).unwrap();
        driver.enable_buffering();

        let (first, _, first_actions) = dispatched(driver.tick());
        let (second, _, second_actions) = dispatched(driver.tick());
        assert_eq!((first.as_str(), second.as_str()), ("once", "often"));
        assert!(first_actions.is_empty());
        assert_eq!(second_actions, ActionSet::empty().with(Action::Buffer));
    }

    #[test]
    fn mixed_frequencies_over_one_hundred_ticks() {
        let (driver, _, _) = driver();
        let fast = Probe::new("fast", 10.0);
        let once = Probe::new("once", 0.0);
        let slow = Probe::new("slow", 1.0);
        let (fast_log, once_log, slow_log) = (fast.log(), once.log(), slow.log());
        for probe in [fast, once, slow] {
            let name = probe.name().to_string();
            driver.register_task(Box::new(probe)).unwrap();
            driver.register_emit_sink(&name, Arc::new(FakeEmitter::consumed(&name))).unwrap();
        }
        driver.enable_emit();

        let first = dispatched(driver.tick());
        for _ in 1..100 {
            driver.tick();
        }

        assert_eq!(once_log.lock().len(), 1);
        assert_eq!(first.1, Timestamp::ZERO);
        assert_eq!(once_log.lock()[0].fire_time, Timestamp::ZERO);
        assert_eq!(fast_log.lock().len(), 90);
        assert_eq!(slow_log.lock().len(), 9);

        let per_second = |log: &[Dispatch], second: u64| {
            log.iter()
                .filter(|d| d.fire_time.as_nanos() / 1_000_000_000 == second)
                .count()
        };
        for second in 0..9 {
            assert_eq!(per_second(fast_log.lock().as_slice(), second), 10);
            assert_eq!(per_second(slow_log.lock().as_slice(), second), 1);
        }
    }

    #[test]
    fn subscribed_persist_sink_gets_one_write_per_tick() {
        let (driver, _, _) = driver();
        let recorder = Arc::new(FakeRecorder::new("x"));
        let probe = Probe::new("x", 5.0).writing_to(recorder.clone());
        driver.register_task(Box::new(probe)).unwrap();
        driver.register_persist_sink("x", recorder.clone(), 5.0).unwrap();
        driver.start_recording(None).unwrap();
        assert!(recorder.is_subscribed());

        let (_, _, actions) = dispatched(driver.tick());
        assert_eq!(actions, ActionSet::empty().with(Action::Persist));
        assert_eq!(recorder.writes(), 1);
    }

    #[test]
    fn contended_persist_lock_skips_persist_only() {
        let (driver, _, _) = driver();
        let recorder = Arc::new(FakeRecorder::new("x"));
        driver.register_task(Box::new(Probe::new("x", 5.0))).unwrap();
        driver.register_persist_sink("x", recorder, 5.0).unwrap();
        driver.start_recording(None).unwrap();
        driver.enable_buffering();

        let guard = driver.persist.lock();
        let (_, _, actions) = dispatched(driver.tick());
        drop(guard);
        assert_eq!(actions, ActionSet::empty().with(Action::Buffer));

        let (_, _, actions) = dispatched(driver.tick());
        assert!(actions.contains(Action::Persist));
    }

    #[test]
    fn stop_recording_unsubscribes_and_closes() {
        let (driver, _, store) = driver();
        let recorder = Arc::new(FakeRecorder::new("x"));
        let events = Arc::new(FakeEventSource::new("touch"));
        driver.register_persist_sink("x", recorder.clone(), 5.0).unwrap();
        driver.register_async_event("touch", events.clone()).unwrap();

        let id = driver.start_recording(None).unwrap();
        assert!(events.recording());
        assert_eq!(driver.stop_recording().unwrap(), Some(id));
        assert!(!recorder.is_subscribed());
        assert!(!events.recording());
        assert!(!driver.is_recording());
        assert_eq!(store.closed_count(), 1);
        assert_eq!(driver.stop_recording().unwrap(), None);
    }

    #[test]
    fn recording_a_named_subset() {
        let (driver, _, _) = driver();
        let a = Arc::new(FakeRecorder::new("a"));
        let b = Arc::new(FakeRecorder::new("b"));
        driver.register_persist_sink("a", a.clone(), 1.0).unwrap();
        driver.register_persist_sink("b", b.clone(), 1.0).unwrap();

        let err = driver.start_recording(Some(&["zzz".to_string()])).unwrap_err();
        assert_eq!(err, BridgeError::NoMatchingSinks);
        assert!(!driver.is_recording());

        driver
            .start_recording(Some(&["b".to_string(), "zzz".to_string()]))
            .unwrap();
        assert!(!a.is_subscribed());
        assert!(b.is_subscribed());
    }

    #[test]
    fn names_are_exclusive_between_tasks_and_events() {
        let (driver, _, _) = driver();
        driver.register_task(Box::new(Probe::new("sonar", 1.0))).unwrap();
        let err = driver
            .register_async_event("sonar", Arc::new(FakeEventSource::new("sonar")))
            .unwrap_err();
        assert_eq!(err, BridgeError::DuplicateName("sonar".into()));

        driver
            .register_async_event("bumper", Arc::new(FakeEventSource::new("bumper")))
            .unwrap();
        let err = driver.register_task(Box::new(Probe::new("bumper", 1.0))).unwrap_err();
        assert_eq!(err, BridgeError::DuplicateName("bumper".into()));
        assert_eq!(driver.list_names(), vec!["sonar".to_string(), "bumper".to_string()]);
    }

    #[test]
    fn duplicate_sinks_are_rejected() {
        let (driver, _, _) = driver();
        driver.register_emit_sink("a", Arc::new(FakeEmitter::idle("a"))).unwrap();
        assert!(matches!(
            driver.register_emit_sink("a", Arc::new(FakeEmitter::idle("a"))),
            Err(BridgeError::DuplicateName(_))
        ));
        driver.register_persist_sink("a", Arc::new(FakeRecorder::new("a")), 1.0).unwrap();
        assert!(matches!(
            driver.register_persist_sink("a", Arc::new(FakeRecorder::new("a")), 1.0),
            Err(BridgeError::DuplicateName(_))
        ));
    }

    #[test]
    fn converter_registration_is_all_or_nothing() {
        let (driver, _, _) = driver();
        driver.register_emit_sink("cam", Arc::new(FakeEmitter::idle("cam"))).unwrap();
        let err = driver
            .register_converter(
                Box::new(Probe::new("cam", 15.0)),
                Some(Arc::new(FakeEmitter::idle("cam"))),
                Some(Arc::new(FakeRecorder::new("cam"))),
            )
            .unwrap_err();
        assert_eq!(err, BridgeError::DuplicateName("cam".into()));
        assert!(driver.list_names().is_empty());

        let recorder = Arc::new(FakeRecorder::new("imu"));
        driver
            .register_converter(
                Box::new(Probe::new("imu", 50.0)),
                Some(Arc::new(FakeEmitter::consumed("imu"))),
                Some(recorder.clone()),
            )
            .unwrap();
        assert_eq!(driver.list_names(), vec!["imu".to_string()]);
        assert_eq!(recorder.horizon(), Duration::from_secs(10));
    }

    #[test]
    fn negative_frequency_is_a_config_error() {
        let (driver, _, _) = driver();
        let err = driver.register_task(Box::new(Probe::new("bad", -2.0))).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn event_registered_while_running_starts_and_follows_emit() {
        let (driver, _, _) = driver();
        driver.enable_emit();
        driver.start().unwrap();
        let source = Arc::new(FakeEventSource::new("touch"));
        driver.register_async_event("touch", source.clone()).unwrap();
        assert!(source.is_processing());
        assert!(source.publishing());

        driver.disable_emit();
        assert!(!source.publishing());
    }

    #[test]
    fn failing_event_start_keeps_the_driver_running() {
        let (driver, _, _) = driver();
        let broken = Arc::new(FakeEventSource::new("audio").failing_start());
        driver.register_async_event("audio", broken.clone()).unwrap();
        driver.start().unwrap();
        assert!(driver.is_running());
        assert!(!broken.is_processing());
        assert!(driver.list_names().contains(&"audio".to_string()));
    }

    #[test]
    fn stop_is_terminal_and_clears_registries() {
        let (driver, _, _) = driver();
        let source = Arc::new(FakeEventSource::new("touch"));
        let stuck = Arc::new(FakeEventSource::new("log").stuck());
        driver.register_task(Box::new(Probe::new("imu", 10.0))).unwrap();
        driver.register_async_event("touch", source.clone()).unwrap();
        driver.register_async_event("log", stuck).unwrap();
        driver.start().unwrap();

        driver.stop();
        assert!(!source.is_processing());
        assert!(driver.list_names().is_empty());
        assert_eq!(driver.pending(), 0);
        assert_eq!(driver.start(), Err(BridgeError::Terminated));
    }

    #[test]
    fn stop_ends_the_run_loop() {
        let clock = Arc::new(crate::clock::SystemClock::new());
        let driver = Arc::new(Driver::new(
            clock,
            Arc::new(MemoryContainerStore::new()),
            EventBus::default(),
            DriverConfig {
                idle_interval: Duration::from_secs(30),
                sleep_slice: Duration::from_millis(5),
                ..DriverConfig::default()
            },
        ));
        driver.start().unwrap();
        let runner = {
            let driver = Arc::clone(&driver);
            std::thread::spawn(move || driver.run())
        };
        std::thread::sleep(Duration::from_millis(20));
        driver.stop();
        runner.join().expect("loop thread");
        assert!(!driver.is_running());
    }

    #[test]
    fn horizon_reaches_every_buffer() {
        let (driver, _, _) = driver();
        let recorder = Arc::new(FakeRecorder::new("x"));
        let source = Arc::new(FakeEventSource::new("touch"));
        driver.register_persist_sink("x", recorder.clone(), 1.0).unwrap();
        driver.register_async_event("touch", source.clone()).unwrap();
        assert_eq!(recorder.horizon(), Duration::from_secs(10));

        driver.set_buffer_horizon(Duration::from_secs(3));
        assert_eq!(driver.buffer_horizon(), Duration::from_secs(3));
        assert_eq!(recorder.horizon(), Duration::from_secs(3));
        assert_eq!(source.horizon(), Duration::from_secs(3));
    }

    #[test]
    fn rebind_session_reaches_emit_sinks_and_events() {
        let (driver, _, _) = driver();
        let sink = Arc::new(FakeEmitter::idle("a"));
        let source = Arc::new(FakeEventSource::new("touch"));
        driver.register_emit_sink("a", sink.clone()).unwrap();
        driver.register_async_event("touch", source.clone()).unwrap();
        assert_eq!(sink.rebinds(), 1);

        driver.rebind_session(EventBus::new(8));
        assert_eq!(sink.rebinds(), 2);
        assert_eq!(source.rebinds(), 2);
    }

    #[test]
    fn subscribed_topics_lists_consumed_sinks() {
        let (driver, _, _) = driver();
        driver.register_emit_sink("a", Arc::new(FakeEmitter::consumed("a"))).unwrap();
        driver.register_emit_sink("b", Arc::new(FakeEmitter::idle("b"))).unwrap();
        assert_eq!(driver.subscribed_topics(), vec!["a".to_string()]);
    }

    #[test]
    fn panicking_task_does_not_unwind_the_scheduler() {
        let (driver, _, _) = driver();
        driver.register_task(Box::new(Probe::new("boom", 1.0).panicking())).unwrap();
        driver.register_emit_sink("boom", Arc::new(FakeEmitter::consumed("boom"))).unwrap();
        driver.enable_emit();
        driver.tick();
        assert_eq!(driver.pending(), 1);
    }

    #[test]
    fn subscribers_attach_on_registration_and_rebind() {
        let (driver, _, _) = driver();
        let speech = Arc::new(FakeSubscriber::new("speech"));
        driver.register_subscriber(speech.clone()).unwrap();
        assert!(speech.is_subscribed());
        assert_eq!(speech.resets(), 1);

        // Same object again: re-attached, not duplicated.
        driver.register_subscriber(speech.clone()).unwrap();
        assert_eq!(speech.resets(), 2);
        let err = driver.register_subscriber(Arc::new(FakeSubscriber::new("speech"))).unwrap_err();
        assert_eq!(err, BridgeError::DuplicateName("speech".into()));

        driver.rebind_session(EventBus::new(8));
        assert_eq!(speech.resets(), 3);
        assert_eq!(driver.subscriber_names(), vec!["speech".to_string()]);
    }

    #[test]
    fn detached_subscriber_stays_registered() {
        let (driver, _, _) = driver();
        let teleop = Arc::new(FakeSubscriber::new("teleop").failing_reset());
        driver.register_subscriber(teleop.clone()).unwrap();
        assert!(!teleop.is_subscribed());
        assert_eq!(driver.subscriber_names(), vec!["teleop".to_string()]);
    }

    #[test]
    fn stop_detaches_and_clears_subscribers() {
        let (driver, _, _) = driver();
        let speech = Arc::new(FakeSubscriber::new("speech"));
        driver.register_subscriber(speech.clone()).unwrap();
        driver.start().unwrap();
        driver.stop();
        assert!(!speech.is_subscribed());
        assert!(driver.subscriber_names().is_empty());
    }
}
