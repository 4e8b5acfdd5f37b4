//! Kind inference and coercion for untyped session values.
//!
//! Ad-hoc registration takes a memory key and optionally a [`DataKind`]. When
//! the kind is [`DataKind::None`] the current value is read once and its kind
//! inferred; a value with no registrable kind (null, arrays, objects) is a
//! [`BridgeError::TypeInferenceFailed`] and the caller must name the kind.

use sensbridge_types::{BridgeError, DataKind, TypedValue};

use crate::session::{HardwareSession, RawValue};

/// Kind of `raw`, or [`DataKind::None`] if it has none.
pub fn infer_kind(raw: &RawValue) -> DataKind {
    match raw {
        RawValue::Bool(_) => DataKind::Bool,
        RawValue::String(_) => DataKind::String,
        RawValue::Number(n) if n.is_i64() || n.is_u64() => DataKind::Int,
        RawValue::Number(_) => DataKind::Float,
        _ => DataKind::None,
    }
}

/// `requested` unless it is `None`, in which case the kind is inferred from
/// the session's current value of `key`.
pub fn resolve_kind(
    session: &dyn HardwareSession,
    key: &str,
    requested: DataKind,
) -> Result<DataKind, BridgeError> {
    if requested != DataKind::None {
        return Ok(requested);
    }
    let failed = |details: String| BridgeError::TypeInferenceFailed {
        key: key.to_string(),
        details: format!("{details}; pass one of: {}", DataKind::HELP),
    };
    let raw = session
        .get_data(key)
        .map_err(|e| failed(format!("value unavailable ({e})")))?;
    match infer_kind(&raw) {
        DataKind::None => Err(failed(format!("value {raw} has no registrable kind"))),
        kind => Ok(kind),
    }
}

/// Convert `raw` to `kind`. Numbers convert between int and float; anything
/// else must already match. `None` when the value does not fit.
pub fn coerce(raw: &RawValue, kind: DataKind) -> Option<TypedValue> {
    match kind {
        DataKind::None => None,
        DataKind::Float => raw.as_f64().map(TypedValue::Float),
        DataKind::Int => raw
            .as_i64()
            .or_else(|| raw.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
            .map(TypedValue::Int),
        DataKind::String => raw.as_str().map(|s| TypedValue::String(s.to_string())),
        DataKind::Bool => raw.as_bool().map(TypedValue::Bool),
    }
}
