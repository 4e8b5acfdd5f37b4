//! [`PersistGate`] – the lock every committed write goes through.
//!
//! The driver owns one gate and shares it with every event source. Periodic
//! tasks write while the scheduler holds it; event workers write inside
//! [`PersistGate::commit`]. Starting or stopping a recording and running a
//! dump all hold the gate too, so a committed write never straddles any of
//! them.

use parking_lot::{Mutex, MutexGuard};
use sensbridge_types::ContainerId;

#[derive(Debug, Default)]
pub(crate) struct PersistState {
    /// `Some` while continuous recording is active.
    pub(crate) container: Option<ContainerId>,
}

#[derive(Debug, Default)]
pub struct PersistGate {
    state: Mutex<PersistState>,
}

impl PersistGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `write` with the gate held.
    ///
    /// Recording selections only change under the gate, so a flag read
    /// inside `write` stays valid until it returns.
    pub fn commit<T>(&self, write: impl FnOnce() -> T) -> T {
        let _state = self.state.lock();
        write()
    }

    /// `true` while a recording container is open.
    pub fn is_recording(&self) -> bool {
        self.state.lock().container.is_some()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PersistState> {
        self.state.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, PersistState>> {
        self.state.try_lock()
    }
}
