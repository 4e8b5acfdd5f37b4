//! Sink capabilities the driver keeps in its registries.
//!
//! The registries hold these as trait objects. The same `Arc` is usually also
//! held, with its concrete type, by the task that feeds it, so rebinding a
//! sink to a new transport is visible from both sides.

use std::sync::Arc;
use std::time::Duration;

use sensbridge_middleware::{ContainerStore, EventBus};
use sensbridge_types::{BridgeError, Timestamp};

use crate::gate::PersistGate;

/// Live delivery target (a "publisher").
pub trait EmitSink: Send + Sync {
    fn topic(&self) -> &str;

    /// `true` when somebody is listening, i.e. emitting is worth the cost.
    fn is_consumed(&self) -> bool;

    /// Attach to `bus`, replacing any previous transport.
    fn rebind(&self, bus: &EventBus);
}

/// Durable delivery target (a "recorder") that also owns a short-horizon
/// buffer for dumps.
pub trait PersistSink: Send + Sync {
    fn topic(&self) -> &str;

    /// Whether the sink is currently selected for continuous recording.
    fn is_subscribed(&self) -> bool;

    fn set_subscribed(&self, subscribed: bool);

    /// Attach to the shared container store. `frequency` is the rate of the
    /// task feeding this sink; it bounds the buffer length.
    fn bind(&self, store: Arc<dyn ContainerStore>, frequency: f64);

    fn set_buffer_horizon(&self, horizon: Duration);

    /// Write the buffered samples that fall within the horizon ending at
    /// `snapshot` into the open container. Returns how many were written.
    fn write_dump(&self, snapshot: Timestamp) -> Result<usize, BridgeError>;

    /// Number of samples currently buffered.
    fn buffered(&self) -> usize;
}

/// An event-driven (non-periodic) source with its own background processing.
pub trait AsyncEventSource: Send + Sync {
    fn name(&self) -> &str;

    /// Start background processing. Idempotent.
    ///
    /// # Errors
    ///
    /// [`BridgeError::BackgroundStartFailed`] when the worker or the
    /// hardware subscription cannot be established.
    fn start_processing(&self) -> Result<(), BridgeError>;

    /// Request the worker to stop and wait at most `grace` for it.
    ///
    /// # Errors
    ///
    /// [`BridgeError::StopTimedOut`] when the worker overruns `grace`.
    fn stop_processing(&self, grace: Duration) -> Result<(), BridgeError>;

    fn is_processing(&self) -> bool;

    fn set_publishing(&self, publishing: bool);
    fn set_recording(&self, recording: bool);
    fn set_dumping(&self, dumping: bool);
    fn is_dumping(&self) -> bool;

    fn rebind(&self, bus: &EventBus);

    /// Attach to the shared container store. Live writes into a recording
    /// must happen inside [`PersistGate::commit`] on `gate`.
    fn bind(&self, store: Arc<dyn ContainerStore>, gate: Arc<PersistGate>);

    fn set_buffer_horizon(&self, horizon: Duration);

    /// Same contract as [`PersistSink::write_dump`].
    fn write_dump(&self, snapshot: Timestamp) -> Result<usize, BridgeError>;
}

/// Inbound path: forwards what arrives on a bus topic into the hardware.
pub trait InboundSubscriber: Send + Sync {
    fn name(&self) -> &str;
    fn topic(&self) -> &str;

    /// Subscribe to `bus`, dropping any previous subscription first.
    ///
    /// # Errors
    ///
    /// [`BridgeError::BackgroundStartFailed`] when the forwarding worker
    /// cannot be started.
    fn reset(&self, bus: &EventBus) -> Result<(), BridgeError>;

    /// Drop the subscription and stop forwarding. Idempotent.
    fn shutdown(&self);

    fn is_subscribed(&self) -> bool;
}
