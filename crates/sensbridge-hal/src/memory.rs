//! Converters over session memory keys.
//!
//! | Constructor              | Message         | Samples                           |
//! |--------------------------|-----------------|-----------------------------------|
//! | [`memory_value_converter`] | [`MemoryValue`] | one key, coerced to a fixed kind |
//! | [`memory_list_converter`]  | [`MemoryList`]  | many keys, each kind inferred    |
//!
//! A key that cannot be read or coerced is "no sample" for a value converter
//! and an entry with `value: None` for a list converter.

use std::sync::Arc;

use sensbridge_kernel::{BufferedRecorder, BusPublisher};
use sensbridge_types::{DataKind, MemoryEntry, MemoryList, MemoryValue, Timestamp};
use tracing::debug;

use crate::converter::Converter;
use crate::kind::{coerce, infer_kind};
use crate::session::HardwareSession;

/// Publisher and recorder for `topic`, both fresh.
fn sinks<M: serde::Serialize + Send + 'static>(
    topic: &str,
    latched: bool,
) -> (Arc<BusPublisher<M>>, Arc<BufferedRecorder<M>>) {
    let publisher = if latched {
        BusPublisher::latched(topic)
    } else {
        BusPublisher::new(topic)
    };
    (Arc::new(publisher), Arc::new(BufferedRecorder::new(topic)))
}

/// Single-key converter named and published after `key`.
///
/// `kind` must already be resolved; see [`crate::kind::resolve_kind`].
pub fn memory_value_converter(
    session: Arc<dyn HardwareSession>,
    key: &str,
    kind: DataKind,
    frequency: f64,
) -> Converter<MemoryValue> {
    memory_value_converter_on(session, key, key, kind, frequency, false)
}

/// Like [`memory_value_converter`] with an explicit task name and a choice
/// of latched publishing (useful for one-shot values).
pub fn memory_value_converter_on(
    session: Arc<dyn HardwareSession>,
    name: &str,
    key: &str,
    kind: DataKind,
    frequency: f64,
    latched: bool,
) -> Converter<MemoryValue> {
    let (publisher, recorder) = sinks(name, latched);
    let key = key.to_string();
    let sampler = move |stamp: Timestamp| {
        let raw = match session.get_data(&key) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(key = %key, error = %e, "memory read failed; no sample");
                return None;
            }
        };
        let Some(value) = coerce(&raw, kind) else {
            debug!(key = %key, %kind, raw = %raw, "value does not fit its kind; no sample");
            return None;
        };
        Some(MemoryValue {
            stamp,
            key: key.clone(),
            value,
        })
    };
    Converter::new(name, frequency, sampler)
        .with_publisher(publisher)
        .with_recorder(recorder)
}

/// Multi-key converter publishing one [`MemoryList`] on `topic`.
pub fn memory_list_converter(
    session: Arc<dyn HardwareSession>,
    topic: &str,
    keys: Vec<String>,
    frequency: f64,
) -> Converter<MemoryList> {
    let (publisher, recorder) = sinks(topic, false);
    let sampler = move |stamp: Timestamp| {
        let entries = keys
            .iter()
            .map(|key| MemoryEntry {
                key: key.clone(),
                value: session
                    .get_data(key)
                    .ok()
                    .and_then(|raw| coerce(&raw, infer_kind(&raw))),
            })
            .collect();
        Some(MemoryList { stamp, entries })
    };
    Converter::new(topic, frequency, sampler)
        .with_publisher(publisher)
        .with_recorder(recorder)
}
