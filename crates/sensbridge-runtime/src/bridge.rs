//! [`Bridge`] – a [`Driver`] wired to a hardware session.
//!
//! The driver knows nothing about memory keys or value kinds; the bridge
//! turns session keys into converters and event sources, registers them,
//! and owns the scheduler thread.
//!
//! # Registration paths
//!
//! | Call | Registers |
//! |---|---|
//! | [`Bridge::register_memory_converter`] | one periodic value task named after its key |
//! | [`Bridge::register_event_converter`] | one event source named after its key |
//! | [`Bridge::add_memory_converters`] | one periodic list task from a `{frequency, topic, memKeys}` description |
//! | [`Bridge::register_default_converters`] | the built-in [`DEFAULT_CONVERTERS`] enabled in the boot config |
//! | [`Bridge::register_memory_writer`] | one inbound subscriber writing a bus topic into a key |
//! | [`Bridge::register_default_subscribers`] | the built-in [`DEFAULT_SUBSCRIBERS`] enabled in the boot config |

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use sensbridge_hal::kind::resolve_kind;
use sensbridge_hal::memory::{memory_list_converter, memory_value_converter, memory_value_converter_on};
use sensbridge_hal::{HardwareSession, MemoryEventSource, MemoryWriter};
use sensbridge_kernel::{Clock, Driver, SystemClock};
use sensbridge_middleware::{EventBus, JsonlContainerStore};
use sensbridge_types::{BridgeError, DataKind};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{BootConfig, RuntimeConfig};

/// Frequency of a batch description that does not name one.
pub const DEFAULT_BATCH_FREQUENCY: f64 = 10.0;

// ─────────────────────────────────────────────────────────────────────────────
// Built-in converters
// ─────────────────────────────────────────────────────────────────────────────

/// Where a built-in converter takes its data from.
#[derive(Debug, Clone, Copy)]
pub enum DefaultSource {
    /// One key of a fixed kind. Latched values reach late subscribers.
    Value {
        key: &'static str,
        kind: DataKind,
        latched: bool,
    },
    /// Several keys sampled together into one list.
    List { keys: &'static [&'static str] },
    /// An event raised by the session.
    Event { key: &'static str, kind: DataKind },
}

/// One entry of the built-in converter table.
#[derive(Debug, Clone, Copy)]
pub struct DefaultConverter {
    pub name: &'static str,
    /// Used when `converters.<name>.frequency` is absent. Ignored for events.
    pub frequency: f64,
    pub source: DefaultSource,
}

impl DefaultConverter {
    /// Every session key this converter reads.
    pub fn keys(&self) -> Vec<&'static str> {
        match self.source {
            DefaultSource::Value { key, .. } | DefaultSource::Event { key, .. } => vec![key],
            DefaultSource::List { keys } => keys.to_vec(),
        }
    }
}

const IMU_TORSO_KEYS: &[&str] = &[
    "Device/SubDeviceList/InertialSensor/GyroscopeX/Sensor/Value",
    "Device/SubDeviceList/InertialSensor/GyroscopeY/Sensor/Value",
    "Device/SubDeviceList/InertialSensor/GyroscopeZ/Sensor/Value",
    "Device/SubDeviceList/InertialSensor/AccelerometerX/Sensor/Value",
    "Device/SubDeviceList/InertialSensor/AccelerometerY/Sensor/Value",
    "Device/SubDeviceList/InertialSensor/AccelerometerZ/Sensor/Value",
    "Device/SubDeviceList/InertialSensor/AngleX/Sensor/Value",
    "Device/SubDeviceList/InertialSensor/AngleY/Sensor/Value",
];

const JOINT_STATE_KEYS: &[&str] = &[
    "Device/SubDeviceList/HeadYaw/Position/Sensor/Value",
    "Device/SubDeviceList/HeadPitch/Position/Sensor/Value",
    "Device/SubDeviceList/LShoulderPitch/Position/Sensor/Value",
    "Device/SubDeviceList/RShoulderPitch/Position/Sensor/Value",
    "Device/SubDeviceList/HipPitch/Position/Sensor/Value",
];

const SONAR_KEYS: &[&str] = &[
    "Device/SubDeviceList/Platform/Front/Sonar/Sensor/Value",
    "Device/SubDeviceList/Platform/Back/Sonar/Sensor/Value",
];

const ODOM_KEYS: &[&str] = &["Motion/Odometry/X", "Motion/Odometry/Y", "Motion/Odometry/Theta"];

const DIAG_KEYS: &[&str] = &[
    "Device/SubDeviceList/Battery/Charge/Sensor/Value",
    "Device/SubDeviceList/HeadYaw/Temperature/Sensor/Value",
    "Device/SubDeviceList/HeadPitch/Temperature/Sensor/Value",
];

/// Converters registered by [`Bridge::register_default_converters`].
pub const DEFAULT_CONVERTERS: &[DefaultConverter] = &[
    DefaultConverter {
        name: "info",
        frequency: 0.0,
        source: DefaultSource::Value {
            key: "RobotConfig/Body/Type",
            kind: DataKind::String,
            latched: true,
        },
    },
    DefaultConverter {
        name: "battery",
        frequency: 1.0,
        source: DefaultSource::Value {
            key: "Device/SubDeviceList/Battery/Charge/Sensor/Value",
            kind: DataKind::Float,
            latched: false,
        },
    },
    DefaultConverter {
        name: "imu_torso",
        frequency: 10.0,
        source: DefaultSource::List { keys: IMU_TORSO_KEYS },
    },
    DefaultConverter {
        name: "joint_states",
        frequency: 50.0,
        source: DefaultSource::List { keys: JOINT_STATE_KEYS },
    },
    DefaultConverter {
        name: "sonar",
        frequency: 10.0,
        source: DefaultSource::List { keys: SONAR_KEYS },
    },
    DefaultConverter {
        name: "odom",
        frequency: 10.0,
        source: DefaultSource::List { keys: ODOM_KEYS },
    },
    DefaultConverter {
        name: "diag",
        frequency: 10.0,
        source: DefaultSource::List { keys: DIAG_KEYS },
    },
    DefaultConverter {
        name: "bumper",
        frequency: 0.0,
        source: DefaultSource::Event {
            key: "RightBumperPressed",
            kind: DataKind::Float,
        },
    },
    DefaultConverter {
        name: "touch_hand",
        frequency: 0.0,
        source: DefaultSource::Event {
            key: "HandRightBackTouched",
            kind: DataKind::Float,
        },
    },
    DefaultConverter {
        name: "touch_head",
        frequency: 0.0,
        source: DefaultSource::Event {
            key: "FrontTactilTouched",
            kind: DataKind::Float,
        },
    },
];

/// One entry of the built-in inbound table: messages on `topic` are written
/// into `key`.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSubscriber {
    pub name: &'static str,
    pub topic: &'static str,
    pub key: &'static str,
    pub kind: DataKind,
}

/// Subscribers registered by [`Bridge::register_default_subscribers`].
pub const DEFAULT_SUBSCRIBERS: &[DefaultSubscriber] = &[
    DefaultSubscriber {
        name: "teleop",
        topic: "cmd_vel",
        key: "Bridge/Teleop/CmdVel",
        kind: DataKind::None,
    },
    DefaultSubscriber {
        name: "moveto",
        topic: "goal_pose",
        key: "Bridge/Moveto/Goal",
        kind: DataKind::None,
    },
    DefaultSubscriber {
        name: "speech",
        topic: "speech",
        key: "Bridge/Speech/TextToSay",
        kind: DataKind::String,
    },
];

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

pub struct Bridge {
    driver: Arc<Driver>,
    session: Arc<dyn HardwareSession>,
    clock: Arc<dyn Clock>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// `clock` must be the clock `driver` was built with; event sources stamp
    /// with it.
    pub fn new(driver: Arc<Driver>, session: Arc<dyn HardwareSession>, clock: Arc<dyn Clock>) -> Self {
        Self {
            driver,
            session,
            clock,
            scheduler: Mutex::new(None),
        }
    }

    /// Assemble a wall-clock bridge recording into `config.container_dir`.
    pub fn from_config(config: &RuntimeConfig, session: Arc<dyn HardwareSession>) -> Result<Self, BridgeError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let store = JsonlContainerStore::new(&config.container_dir)?;
        let driver = Driver::new(
            Arc::clone(&clock),
            Arc::new(store),
            EventBus::new(config.bus_capacity),
            config.driver.clone(),
        );
        info!(dir = %config.container_dir.display(), "bridge assembled");
        Ok(Self::new(Arc::new(driver), session, clock))
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Register a periodic task sampling `key` at `frequency` Hz.
    ///
    /// With [`DataKind::None`] the kind is inferred from the key's current
    /// value.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::TypeInferenceFailed`] when the kind cannot be inferred.
    /// - [`BridgeError::DuplicateName`] when `key` is already registered.
    pub fn register_memory_converter(&self, key: &str, frequency: f64, kind: DataKind) -> Result<usize, BridgeError> {
        let kind = resolve_kind(self.session.as_ref(), key, kind)?;
        let index = memory_value_converter(Arc::clone(&self.session), key, kind, frequency).register(&self.driver)?;
        info!(key, frequency, %kind, "memory converter registered");
        Ok(index)
    }

    /// Register an event source on `key`. Starts at once on a running bridge.
    pub fn register_event_converter(&self, key: &str, kind: DataKind) -> Result<(), BridgeError> {
        let kind = resolve_kind(self.session.as_ref(), key, kind)?;
        let source = MemoryEventSource::new(Arc::clone(&self.session), key, kind, Arc::clone(&self.clock));
        self.driver.register_async_event(key, Arc::new(source))?;
        info!(key, %kind, "event converter registered");
        Ok(())
    }

    /// Register one list task from a description such as
    /// `{"frequency": 5, "topic": "head", "memKeys": ["a", "b"]}`.
    ///
    /// A missing or unreadable `frequency` falls back to
    /// [`DEFAULT_BATCH_FREQUENCY`]; `topic` and a non-empty `memKeys` are
    /// required.
    pub fn add_memory_converters(&self, description: &Value) -> Result<usize, BridgeError> {
        let frequency = batch_frequency(description.get("frequency"));
        let topic = description
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Config("\"topic\" could not be retrieved; no converter added".into()))?;
        let keys = description
            .get("memKeys")
            .and_then(Value::as_array)
            .ok_or_else(|| BridgeError::Config("\"memKeys\" must be a list of keys; no converter added".into()))?
            .iter()
            .map(|key| {
                key.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| BridgeError::Config(format!("memory key {key} is not a string")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Err(BridgeError::Config("the list of keys to add is empty".into()));
        }

        let count = keys.len();
        let index = memory_list_converter(Arc::clone(&self.session), topic, keys, frequency).register(&self.driver)?;
        info!(topic, frequency, keys = count, "memory list converter registered");
        Ok(index)
    }

    /// [`add_memory_converters`](Self::add_memory_converters) on the JSON
    /// document at `path`.
    pub fn add_memory_converters_from(&self, path: &Path) -> Result<usize, BridgeError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
        let description: Value = serde_json::from_str(&raw)
            .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
        self.add_memory_converters(&description)
    }

    /// Register every built-in converter enabled by
    /// `converters.<name>.enabled` (default `true`), at
    /// `converters.<name>.frequency` when given.
    ///
    /// A converter that fails to register is logged and skipped. Returns the
    /// names that were registered.
    pub fn register_default_converters(&self, boot: &BootConfig) -> Vec<String> {
        let mut registered = Vec::new();
        for default in DEFAULT_CONVERTERS {
            let name = default.name;
            if !boot.get(&format!("converters.{name}.enabled"), true) {
                debug!(converter = name, "disabled in boot config");
                continue;
            }
            let frequency = boot.get(&format!("converters.{name}.frequency"), default.frequency);
            let result = match default.source {
                DefaultSource::Value { key, kind, latched } => {
                    memory_value_converter_on(Arc::clone(&self.session), name, key, kind, frequency, latched)
                        .register(&self.driver)
                        .map(drop)
                }
                DefaultSource::List { keys } => memory_list_converter(
                    Arc::clone(&self.session),
                    name,
                    keys.iter().map(|k| k.to_string()).collect(),
                    frequency,
                )
                .register(&self.driver)
                .map(drop),
                DefaultSource::Event { key, kind } => {
                    let source =
                        MemoryEventSource::named(Arc::clone(&self.session), name, key, kind, Arc::clone(&self.clock));
                    self.driver.register_async_event(name, Arc::new(source))
                }
            };
            match result {
                Ok(()) => registered.push(name.to_string()),
                Err(e) => warn!(converter = name, error = %e, "default converter not registered"),
            }
        }
        info!(count = registered.len(), "default converters registered");
        registered
    }

    /// Forward every message on bus `topic` into session key `key`, checked
    /// against `kind` unless it is [`DataKind::None`].
    pub fn register_memory_writer(&self, name: &str, topic: &str, key: &str, kind: DataKind) -> Result<(), BridgeError> {
        let writer = MemoryWriter::new(Arc::clone(&self.session), name, topic, key, kind);
        self.driver.register_subscriber(Arc::new(writer))?;
        info!(name, topic, key, %kind, "memory writer registered");
        Ok(())
    }

    /// Register every built-in subscriber enabled by
    /// `subscribers.<name>.enabled` (default `true`). Does nothing once any
    /// subscriber is registered. Returns the names that were registered.
    pub fn register_default_subscribers(&self, boot: &BootConfig) -> Vec<String> {
        if !self.driver.subscriber_names().is_empty() {
            debug!("subscribers already registered; defaults skipped");
            return Vec::new();
        }
        let mut registered = Vec::new();
        for default in DEFAULT_SUBSCRIBERS {
            let name = default.name;
            if !boot.get(&format!("subscribers.{name}.enabled"), true) {
                debug!(subscriber = name, "disabled in boot config");
                continue;
            }
            match self.register_memory_writer(name, default.topic, default.key, default.kind) {
                Ok(()) => registered.push(name.to_string()),
                Err(e) => warn!(subscriber = name, error = %e, "default subscriber not registered"),
            }
        }
        info!(count = registered.len(), "default subscribers registered");
        registered
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Start the driver and run its scheduler loop on a dedicated thread.
    pub fn start(&self) -> Result<(), BridgeError> {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return Ok(());
        }
        self.driver.start()?;
        let driver = Arc::clone(&self.driver);
        let handle = thread::Builder::new()
            .name("sensbridge-scheduler".into())
            .spawn(move || driver.run())
            .map_err(|e| BridgeError::BackgroundStartFailed {
                name: "scheduler".into(),
                details: e.to_string(),
            })?;
        *scheduler = Some(handle);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    /// Stop the driver for good and wait for the scheduler thread.
    pub fn shutdown(&self) {
        self.driver.stop();
        if let Some(handle) = self.scheduler.lock().take() {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }
}

fn batch_frequency(raw: Option<&Value>) -> f64 {
    let parsed = match raw {
        None => {
            debug!("\"frequency\" was not found; default to {DEFAULT_BATCH_FREQUENCY} Hz");
            return DEFAULT_BATCH_FREQUENCY;
        }
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(_) => None,
    };
    parsed.unwrap_or_else(|| {
        warn!(raw = ?raw, "\"frequency\" could not be interpreted as a number; default to {DEFAULT_BATCH_FREQUENCY} Hz");
        DEFAULT_BATCH_FREQUENCY
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensbridge_hal::SimSession;
    use sensbridge_kernel::{DriverConfig, ManualClock};
    use sensbridge_middleware::MemoryContainerStore;
    use sensbridge_types::{Envelope, Timestamp};
    use serde_json::json;

    fn bridge(session: &SimSession) -> Bridge {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let driver = Driver::new(
            Arc::clone(&clock),
            Arc::new(MemoryContainerStore::new()),
            EventBus::default(),
            DriverConfig::default(),
        );
        Bridge::new(Arc::new(driver), Arc::new(session.clone()), clock)
    }

    fn seeded_session() -> SimSession {
        let mut builder = SimSession::builder();
        for default in DEFAULT_CONVERTERS {
            for key in default.keys() {
                builder = builder.with_value(key, 0.0);
            }
        }
        builder.with_value("RobotConfig/Body/Type", "sim").build()
    }

    #[test]
    fn duplicate_memory_converter_is_rejected() {
        let session = SimSession::builder().with_value("Battery/Charge", 0.9).build();
        let bridge = bridge(&session);
        bridge
            .register_memory_converter("Battery/Charge", 1.0, DataKind::None)
            .unwrap();
        let err = bridge
            .register_memory_converter("Battery/Charge", 5.0, DataKind::Float)
            .unwrap_err();
        assert_eq!(err, BridgeError::DuplicateName("Battery/Charge".into()));
        assert_eq!(bridge.driver().list_names(), vec!["Battery/Charge".to_string()]);
    }

    #[test]
    fn memory_converter_needs_an_inferable_kind() {
        let session = SimSession::builder().with_value("Odd", json!({"x": 1})).build();
        let bridge = bridge(&session);
        let err = bridge
            .register_memory_converter("Odd", 1.0, DataKind::None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::TypeInferenceFailed { .. }));
        assert!(bridge.driver().list_names().is_empty());
    }

    #[test]
    fn event_converter_cannot_shadow_a_task() {
        let session = SimSession::builder().with_value("Touch", true).build();
        let bridge = bridge(&session);
        bridge.register_memory_converter("Touch", 2.0, DataKind::None).unwrap();
        let err = bridge.register_event_converter("Touch", DataKind::None).unwrap_err();
        assert_eq!(err, BridgeError::DuplicateName("Touch".into()));
    }

    #[test]
    fn batch_description_defaults_frequency() {
        let bridge = bridge(&SimSession::builder().build());
        bridge
            .add_memory_converters(&json!({"topic": "head", "memKeys": ["Head/Yaw", "Head/Pitch"]}))
            .unwrap();
        bridge
            .add_memory_converters(&json!({"frequency": "2.5", "topic": "legs", "memKeys": ["Knee"]}))
            .unwrap();
        assert_eq!(bridge.driver().list_names(), vec!["head".to_string(), "legs".to_string()]);
        assert_eq!(batch_frequency(None), DEFAULT_BATCH_FREQUENCY);
        assert_eq!(batch_frequency(Some(&json!("fast"))), DEFAULT_BATCH_FREQUENCY);
        assert_eq!(batch_frequency(Some(&json!(4))), 4.0);
    }

    #[test]
    fn batch_description_requires_topic_and_keys() {
        let bridge = bridge(&SimSession::builder().build());
        for description in [
            json!({"memKeys": ["a"]}),
            json!({"topic": "t"}),
            json!({"topic": "t", "memKeys": []}),
            json!({"topic": "t", "memKeys": [1]}),
        ] {
            assert!(
                matches!(bridge.add_memory_converters(&description), Err(BridgeError::Config(_))),
                "{description} should be rejected"
            );
        }
        assert!(bridge.driver().list_names().is_empty());
    }

    #[test]
    fn batch_description_from_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("keys.json");
        fs::write(&path, r#"{"frequency": 1, "topic": "arm", "memKeys": ["Elbow"]}"#).unwrap();
        let bridge = bridge(&SimSession::builder().build());
        bridge.add_memory_converters_from(&path).unwrap();
        assert_eq!(bridge.driver().list_names(), vec!["arm".to_string()]);
        assert!(matches!(
            bridge.add_memory_converters_from(&dir.path().join("missing.json")),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn default_converters_follow_boot_config() {
        let session = seeded_session();
        let bridge = bridge(&session);
        let boot = BootConfig::from_value(json!({
            "converters": {
                "joint_states": { "enabled": false },
                "touch_head": { "enabled": false },
                "sonar": { "frequency": 2 }
            }
        }));
        let names = bridge.register_default_converters(&boot);
        assert_eq!(
            names,
            ["info", "battery", "imu_torso", "sonar", "odom", "diag", "bumper", "touch_hand"]
        );
        assert_eq!(bridge.driver().pending(), 6);
    }

    #[test]
    fn default_converters_skip_taken_names() {
        let session = seeded_session();
        let bridge = bridge(&session);
        bridge
            .add_memory_converters(&json!({"topic": "odom", "memKeys": ["Motion/Odometry/X"]}))
            .unwrap();
        let names = bridge.register_default_converters(&BootConfig::default());
        assert!(!names.contains(&"odom".to_string()));
        assert_eq!(names.len(), DEFAULT_CONVERTERS.len() - 1);
    }

    #[test]
    fn start_runs_scheduler_and_event_sources() {
        let session = seeded_session();
        let bridge = bridge(&session);
        bridge.register_default_converters(&BootConfig::default());
        bridge.start().unwrap();
        assert!(bridge.is_started());
        assert!(bridge.driver().is_running());
        assert_eq!(session.subscriber_count("RightBumperPressed"), 1);

        bridge.shutdown();
        assert!(!bridge.is_started());
        assert!(bridge.driver().is_terminated());
        assert_eq!(session.subscriber_count("RightBumperPressed"), 0);
        assert!(matches!(bridge.start(), Err(BridgeError::Terminated)));
    }

    #[test]
    fn from_config_records_into_container_dir() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let boot = BootConfig::from_value(json!({ "recorder": { "container_dir": dir.path().join("bags") } }));
        let config = RuntimeConfig::from_boot(&boot, Path::new("unused"));
        let bridge = Bridge::from_config(&config, Arc::new(SimSession::builder().build())).unwrap();
        assert!(dir.path().join("bags").is_dir());
        assert!(bridge.driver().list_containers().unwrap().is_empty());
    }

    #[test]
    fn default_subscribers_follow_boot_config_once() {
        let bridge = bridge(&SimSession::builder().build());
        let boot = BootConfig::from_value(json!({ "subscribers": { "moveto": { "enabled": false } } }));
        assert_eq!(bridge.register_default_subscribers(&boot), ["teleop", "speech"]);
        assert!(bridge.register_default_subscribers(&boot).is_empty());
        assert_eq!(bridge.driver().subscriber_names(), ["speech", "teleop"]);
        bridge.shutdown();
    }

    fn wait_for(session: &SimSession, key: &str, expected: Value) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while session.get_data(key).ok() != Some(expected.clone()) {
            assert!(std::time::Instant::now() < deadline, "{key} never became {expected}");
            thread::sleep(std::time::Duration::from_millis(2));
        }
    }

    #[test]
    fn memory_writer_follows_the_session_bus() {
        let session = SimSession::builder().build();
        let bridge = bridge(&session);
        bridge
            .register_memory_writer("say", "speech", "Bridge/Say", DataKind::String)
            .unwrap();
        let say = |bus: &EventBus, text: &str| {
            bus.publish(Envelope::new("speech", Timestamp::ZERO, &text).unwrap());
        };

        say(&bridge.driver().bus(), "first");
        wait_for(&session, "Bridge/Say", json!("first"));

        let old = bridge.driver().bus();
        bridge.driver().rebind_session(EventBus::default());
        assert!(!old.has_active_consumer("speech"));
        say(&bridge.driver().bus(), "second");
        wait_for(&session, "Bridge/Say", json!("second"));

        bridge.shutdown();
        assert!(!bridge.driver().bus().has_active_consumer("speech"));
        assert!(bridge.driver().subscriber_names().is_empty());
    }
}
