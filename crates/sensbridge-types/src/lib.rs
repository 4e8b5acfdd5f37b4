//! `sensbridge-types` – shared vocabulary of the bridge.
//!
//! Timestamps, the three delivery [`Action`]s, the value kinds understood by
//! ad-hoc registration, the envelope that travels over the emit bus and into
//! recording containers, and the workspace-wide [`BridgeError`].

use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Time
// ────────────────────────────────────────────────────────────────────────────

/// A point on the driver clock, in nanoseconds since the clock's origin.
///
/// The origin is whatever the driver's clock says it is; timestamps from
/// different clocks are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs.max(0.0) * 1e9).round() as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Time from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let nanos = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Delivery actions
// ────────────────────────────────────────────────────────────────────────────

/// One of the three orthogonal things that can happen to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Publish live to consumers.
    Emit,
    /// Append to the open recording container.
    Persist,
    /// Keep in the short-horizon buffer for a later dump.
    Buffer,
}

impl Action {
    const fn bit(self) -> u8 {
        match self {
            Action::Emit => 0b001,
            Action::Persist => 0b010,
            Action::Buffer => 0b100,
        }
    }
}

/// The set of [`Action`]s selected for one dispatch.
///
/// Iteration always yields `Emit`, `Persist`, `Buffer` in that order, which
/// is the fan-out order converters must follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ActionSet(u8);

impl ActionSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn with(mut self, action: Action) -> Self {
        self.insert(action);
        self
    }

    pub fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Action> {
        [Action::Emit, Action::Persist, Action::Buffer]
            .into_iter()
            .filter(move |a| self.contains(*a))
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        iter.into_iter().fold(ActionSet::empty(), ActionSet::with)
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter()
            .map(|a| match a {
                Action::Emit => "emit",
                Action::Persist => "persist",
                Action::Buffer => "buffer",
            })
            .collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Value kinds
// ────────────────────────────────────────────────────────────────────────────

/// Semantic kind of an untyped hardware value.
///
/// The numeric codes are the ones operators type at the command line.
/// [`DataKind::None`] is never registrable: it asks the bridge to infer the
/// kind from the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    None = 0,
    Float = 1,
    Int = 2,
    String = 3,
    Bool = 4,
}

impl TryFrom<u8> for DataKind {
    type Error = BridgeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DataKind::None),
            1 => Ok(DataKind::Float),
            2 => Ok(DataKind::Int),
            3 => Ok(DataKind::String),
            4 => Ok(DataKind::Bool),
            other => Err(BridgeError::TypeInferenceFailed {
                key: String::new(),
                details: format!("unknown kind code {other}; expected {}", DataKind::HELP),
            }),
        }
    }
}

impl FromStr for DataKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "auto" => Ok(DataKind::None),
            "float" => Ok(DataKind::Float),
            "int" | "integer" => Ok(DataKind::Int),
            "string" => Ok(DataKind::String),
            "bool" | "boolean" => Ok(DataKind::Bool),
            other => match other.parse::<u8>() {
                Ok(code) => DataKind::try_from(code),
                Err(_) => Err(BridgeError::TypeInferenceFailed {
                    key: String::new(),
                    details: format!("unknown kind '{other}'; expected {}", DataKind::HELP),
                }),
            },
        }
    }
}

impl DataKind {
    /// Operator-facing list of accepted kinds.
    pub const HELP: &'static str = "0 - none, 1 - float, 2 - int, 3 - string, 4 - bool";
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataKind::None => "none",
            DataKind::Float => "float",
            DataKind::Int => "int",
            DataKind::String => "string",
            DataKind::Bool => "bool",
        };
        f.write_str(s)
    }
}

/// A hardware value after its kind has been fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TypedValue {
    Float(f64),
    Int(i64),
    String(String),
    Bool(bool),
}

impl TypedValue {
    pub fn kind(&self) -> DataKind {
        match self {
            TypedValue::Float(_) => DataKind::Float,
            TypedValue::Int(_) => DataKind::Int,
            TypedValue::String(_) => DataKind::String,
            TypedValue::Bool(_) => DataKind::Bool,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// A single stamped memory value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryValue {
    pub stamp: Timestamp,
    pub key: String,
    pub value: TypedValue,
}

/// One entry of a [`MemoryList`]; `value` is `None` when the key could not
/// be read or typed on this sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Option<TypedValue>,
}

/// A batch of memory values sampled together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryList {
    pub stamp: Timestamp,
    pub entries: Vec<MemoryEntry>,
}

/// Topic-addressed, type-erased message as it travels on the emit bus and
/// as it is stored in a recording container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub stamp: Timestamp,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new<M: Serialize>(topic: &str, stamp: Timestamp, message: &M) -> Result<Self, BridgeError> {
        let payload = serde_json::to_value(message)
            .map_err(|e| BridgeError::Serialization(format!("{topic}: {e}")))?;
        Ok(Self {
            topic: topic.to_string(),
            stamp,
            payload,
        })
    }
}

/// Identity of a finalized (or in-progress) recording container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
///
/// Per-tick failures never surface as `BridgeError` to callers; they are
/// logged where they happen. Registration, recording and dump operations
/// return these synchronously.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("'{0}' is not registered")]
    NotFound(String),

    #[error("'{0}' is already registered")]
    DuplicateName(String),

    #[error("cannot infer a registrable kind for '{key}': {details}")]
    TypeInferenceFailed { key: String, details: String },

    #[error("buffering is not enabled; enable it before requesting a dump")]
    BufferingDisabled,

    #[error("storage exhausted ({used} of {limit} bytes used); remove old containers first")]
    StorageExhausted { used: u64, limit: u64 },

    #[error("none of the requested names has a recorder; list available names first")]
    NoMatchingSinks,

    #[error("background processing for '{name}' failed to start: {details}")]
    BackgroundStartFailed { name: String, details: String },

    #[error("'{name}' did not stop within {grace_ms} ms")]
    StopTimedOut { name: String, grace_ms: u64 },

    #[error("the driver has been stopped and cannot be restarted")]
    Terminated,

    #[error("hardware session error on {source_id}: {details}")]
    Hardware { source_id: String, details: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}
