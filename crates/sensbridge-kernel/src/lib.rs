//! `sensbridge-kernel` – Scheduler & Dispatch
//!
//! The core of the bridge. It decides, tick by tick, which task runs next and
//! which of the three delivery actions (emit, persist, buffer) apply to it,
//! and it coordinates on-demand dumps of everything buffered.
//!
//! # Modules
//!
//! - [`clock`] – [`Clock`][clock::Clock] with a wall-clock and a simulated
//!   implementation.
//! - [`task`] – the [`Task`][task::Task] capability every periodic converter
//!   implements.
//! - [`sink`] – [`EmitSink`][sink::EmitSink], [`PersistSink`][sink::PersistSink]
//!   [`AsyncEventSource`][sink::AsyncEventSource] and the inbound
//!   [`InboundSubscriber`][sink::InboundSubscriber].
//! - [`schedule`] – the min-heap of next fire times.
//! - [`registry`] – [`NamedTable`][registry::NamedTable], the duplicate-refusing
//!   name → entry table behind every registry.
//! - [`driver`] – [`Driver`][driver::Driver]: registration, the scheduler tick,
//!   delivery flags, recording and the run/stop lifecycle.
//! - [`dump`] – [`Driver::dump`][driver::Driver::dump], the buffer flush.
//! - [`gate`] – [`PersistGate`][gate::PersistGate], the persist lock shared
//!   with event sources.
//! - [`publisher`] / [`recorder`] – the standard bus-backed emit sink and
//!   store-backed persist sink.

pub mod clock;
pub mod driver;
pub mod dump;
pub mod gate;
pub mod publisher;
pub mod recorder;
pub mod registry;
pub mod schedule;
pub mod sink;
pub mod task;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{Driver, DriverConfig, TickOutcome};
pub use gate::PersistGate;
pub use publisher::BusPublisher;
pub use recorder::BufferedRecorder;
pub use sink::{AsyncEventSource, EmitSink, InboundSubscriber, PersistSink};
pub use task::{Dispatch, Task};
