//! The periodic [`Task`] capability.
//!
//! A task (a "converter") samples one data source and fans the sample out to
//! whichever sinks the scheduler selected for this dispatch. The scheduler
//! only ever sees this trait; payload types stay inside the implementation.

use sensbridge_types::{ActionSet, Timestamp};

/// What the scheduler asks of a task on one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Scheduled fire time of this dispatch. Use it as the sample stamp.
    pub fire_time: Timestamp,
    /// Never empty when handed to [`Task::invoke`].
    pub actions: ActionSet,
}

/// A named periodic unit of work.
///
/// Implementations must not panic on hardware failures: a failed pull is
/// "no sample this tick" and the invocation simply returns.
pub trait Task: Send {
    /// Unique name; also the key of this task's emit and persist sinks.
    fn name(&self) -> &str;

    /// Dispatch frequency in Hz. `0.0` means fire once.
    fn frequency(&self) -> f64;

    /// Called once when the task enters the registry.
    fn reset(&mut self) {}

    /// Pull one sample and deliver it, in `Emit`, `Persist`, `Buffer` order,
    /// to every action in `dispatch.actions`.
    fn invoke(&mut self, dispatch: &Dispatch);
}
