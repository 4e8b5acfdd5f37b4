//! [`SimSession`] – in-process [`HardwareSession`] for CI and the CLI.
//!
//! Holds a key/value memory and a table of event subscribers, so the whole
//! bridge can run without a robot.
//!
//! # Stub behaviour
//!
//! | Call                 | Behaviour                                                   |
//! |----------------------|-------------------------------------------------------------|
//! | `get_data(key)`      | Last value stored under `key`; `Hardware` error if unknown. |
//! | `subscribe(event,…)` | Stores the callback; fails if subscriptions are disabled.   |
//! | `raise_event(key,v)` | Stores `v` and calls every subscriber of `key`.             |
//! | `set_data(key,v)`    | Same as `raise_event`.                                      |
//!
//! # Example
//!
//! ```rust
//! use sensbridge_hal::session::HardwareSession;
//! use sensbridge_hal::sim::SimSession;
//!
//! let session = SimSession::builder()
//!     .with_value("Device/Battery/Charge", 0.87)
//!     .with_value("RobotConfig/Body/Type", "sim")
//!     .build();
//!
//! assert_eq!(session.get_data("Device/Battery/Charge").unwrap(), 0.87);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sensbridge_types::BridgeError;
use serde_json::Value;
use tracing::trace;

use crate::session::{EventCallback, HardwareSession, RawValue, SubscriptionId};

struct Subscriber {
    id: SubscriptionId,
    callback: Arc<dyn Fn(RawValue) + Send + Sync>,
}

#[derive(Default)]
struct SimState {
    memory: HashMap<String, RawValue>,
    subscribers: HashMap<String, Vec<Subscriber>>,
}

/// Simulated session. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SimSession {
    state: Arc<RwLock<SimState>>,
    refuse_subscriptions: bool,
}

/// Builder for [`SimSession`].
#[derive(Default)]
pub struct SimSessionBuilder {
    values: Vec<(String, RawValue)>,
    refuse_subscriptions: bool,
}

impl SimSessionBuilder {
    /// Seed memory key `key` with `value`.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((key.into(), value.into()));
        self
    }

    /// Make every `subscribe` call fail, to exercise event sources that
    /// cannot start.
    pub fn refusing_subscriptions(mut self) -> Self {
        self.refuse_subscriptions = true;
        self
    }

    pub fn build(self) -> SimSession {
        let session = SimSession {
            state: Arc::default(),
            refuse_subscriptions: self.refuse_subscriptions,
        };
        {
            let mut state = session.state.write();
            state.memory.extend(self.values);
        }
        session
    }
}

impl SimSession {
    pub fn builder() -> SimSessionBuilder {
        SimSessionBuilder::default()
    }

    /// Overwrite a memory key without notifying subscribers.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.state.write().memory.insert(key.to_string(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.state.write().memory.remove(key);
    }

    /// Store `value` under `key` and deliver it to every subscriber of
    /// `key`. Returns how many callbacks ran.
    pub fn raise_event(&self, key: &str, value: impl Into<Value>) -> usize {
        let value = value.into();
        let callbacks: Vec<_> = {
            let mut state = self.state.write();
            state.memory.insert(key.to_string(), value.clone());
            state
                .subscribers
                .get(key)
                .map(|subs| subs.iter().map(|s| Arc::clone(&s.callback)).collect())
                .unwrap_or_default()
        };
        for callback in &callbacks {
            callback(value.clone());
        }
        trace!(event = %key, delivered = callbacks.len(), "sim event raised");
        callbacks.len()
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.state.read().subscribers.get(key).map_or(0, Vec::len)
    }

    /// Every memory key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.state.read().memory.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl HardwareSession for SimSession {
    fn get_data(&self, key: &str) -> Result<RawValue, BridgeError> {
        self.state
            .read()
            .memory
            .get(key)
            .cloned()
            .ok_or_else(|| BridgeError::Hardware {
                source_id: key.to_string(),
                details: "no such memory key".into(),
            })
    }

    fn set_data(&self, key: &str, value: RawValue) -> Result<(), BridgeError> {
        self.raise_event(key, value);
        Ok(())
    }

    fn subscribe(&self, event: &str, callback: EventCallback) -> Result<SubscriptionId, BridgeError> {
        if self.refuse_subscriptions {
            return Err(BridgeError::Hardware {
                source_id: event.to_string(),
                details: "subscriptions are disabled on this session".into(),
            });
        }
        let id = SubscriptionId::new();
        self.state
            .write()
            .subscribers
            .entry(event.to_string())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::from(callback),
            });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BridgeError> {
        let mut state = self.state.write();
        for subs in state.subscribers.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return Ok(());
            }
        }
        Err(BridgeError::NotFound(format!("subscription {id}")))
    }
}
