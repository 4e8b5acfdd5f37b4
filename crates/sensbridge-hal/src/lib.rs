//! `sensbridge-hal` – Hardware Session & Reference Converters
//!
//! Everything between the robot's data layer and the scheduler core.
//!
//! # Modules
//!
//! - [`session`] – the [`HardwareSession`][session::HardwareSession] trait.
//! - [`sim`] – [`SimSession`][sim::SimSession], an in-process session for
//!   tests and the CLI.
//! - [`kind`] – kind inference and coercion of untyped values.
//! - [`converter`] – [`Converter`][converter::Converter], the generic
//!   periodic task.
//! - [`memory`] – converters over one or many memory keys.
//! - [`event`] – [`MemoryEventSource`][event::MemoryEventSource], an
//!   event-driven source with its own worker thread.
//! - [`writer`] – [`MemoryWriter`][writer::MemoryWriter], the inbound path
//!   from a bus topic into a memory key.

pub mod converter;
pub mod event;
pub mod kind;
pub mod memory;
pub mod session;
pub mod sim;
pub mod writer;

pub use converter::{Converter, Sampler};
pub use event::MemoryEventSource;
pub use session::{HardwareSession, RawValue, SubscriptionId};
pub use sim::SimSession;
pub use writer::MemoryWriter;
