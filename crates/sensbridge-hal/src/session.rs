//! [`HardwareSession`] – the interface to the robot's data layer.
//!
//! Everything the bridge samples comes from a session: periodic converters
//! pull values with [`HardwareSession::get_data`], event sources register a
//! callback with [`HardwareSession::subscribe`], and inbound subscribers
//! write with [`HardwareSession::set_data`]. Implementations own
//! connection handling; the bridge only ever asks "do you have data" and
//! treats an error as "not this time".

use std::fmt;

use serde::{Deserialize, Serialize};
use sensbridge_types::BridgeError;
use uuid::Uuid;

/// Untyped value as delivered by the session.
pub type RawValue = serde_json::Value;

/// Invoked on the session's own thread for every raised event.
pub type EventCallback = Box<dyn Fn(RawValue) + Send + Sync>;

/// Handle returned by [`HardwareSession::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

pub trait HardwareSession: Send + Sync {
    /// Current value stored under `key`.
    fn get_data(&self, key: &str) -> Result<RawValue, BridgeError>;

    /// Store `value` under `key`, raising it as an event to any subscriber.
    fn set_data(&self, key: &str, value: RawValue) -> Result<(), BridgeError>;

    /// Call `callback` with the new value every time `event` is raised.
    fn subscribe(&self, event: &str, callback: EventCallback) -> Result<SubscriptionId, BridgeError>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BridgeError>;
}
