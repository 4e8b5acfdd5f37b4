//! `sensbridge-middleware` – The transports
//!
//! Moves data out of the bridge without caring about its meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-addressed publish/subscribe [`EventBus`] built on Tokio
//!   broadcast channels; the live (emit) transport.
//! - [`container`] – the [`ContainerStore`] trait for the durable (persist)
//!   transport, with a JSON-lines file store and an in-memory store.

pub mod bus;
pub mod container;

pub use bus::{EventBus, TopicReceiver};
pub use container::{ContainerStore, JsonlContainerStore, MemoryContainerStore, CONTAINER_EXTENSION};
