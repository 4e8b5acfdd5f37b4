//! On-demand dump of every buffered sample into a fresh container.
//!
//! While a dump runs, buffering is suspended (`buffer_enabled = false` and
//! every event source marked as dumping) so the snapshot being written is not
//! mutated underneath. The suspension is an RAII guard: whatever happens after
//! it is engaged, buffering is back on when [`Driver::dump`] returns.
//!
//! The persist lock is taken once, before an active recording is stopped,
//! and held until the dump container is closed or discarded.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use sensbridge_types::{BridgeError, ContainerId, Timestamp};
use tracing::{debug, error, info, warn};

use crate::driver::Driver;
use crate::sink::{AsyncEventSource, PersistSink};

enum DumpTarget {
    Recorder(Arc<dyn PersistSink>),
    Event(Arc<dyn AsyncEventSource>),
}

impl DumpTarget {
    fn write_dump(&self, snapshot: Timestamp) -> Result<usize, BridgeError> {
        match self {
            DumpTarget::Recorder(sink) => sink.write_dump(snapshot),
            DumpTarget::Event(source) => source.write_dump(snapshot),
        }
    }
}

/// Buffering stays off for as long as this lives.
struct BufferSuspension<'a> {
    driver: &'a Driver,
    sources: Vec<Arc<dyn AsyncEventSource>>,
}

impl<'a> BufferSuspension<'a> {
    fn engage(driver: &'a Driver) -> Self {
        driver.buffer_enabled.store(false, Ordering::SeqCst);
        let sources: Vec<_> = driver.event_sources().into_iter().map(|(_, s)| s).collect();
        for source in &sources {
            source.set_dumping(true);
        }
        Self { driver, sources }
    }
}

impl Drop for BufferSuspension<'_> {
    fn drop(&mut self) {
        for source in &self.sources {
            source.set_dumping(false);
        }
        self.driver.buffer_enabled.store(true, Ordering::SeqCst);
    }
}

impl Driver {
    /// Flush the buffers of every persist sink and event source (or only of
    /// `names`) into a new container tagged `prefix`.
    ///
    /// An active continuous recording is stopped first.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::BufferingDisabled`] when buffering is off; nothing is
    ///   touched.
    /// - [`BridgeError::StorageExhausted`] when the store is over its limit.
    /// - [`BridgeError::NoMatchingSinks`] when no requested name has a buffer.
    /// - Any flush or storage error; the partial container is discarded.
    pub fn dump(&self, prefix: &str, names: Option<&[String]>) -> Result<ContainerId, BridgeError> {
        if !self.is_buffering() {
            return Err(BridgeError::BufferingDisabled);
        }
        let used = self.store.used_bytes()?;
        let limit = self.config.storage_limit;
        if used >= limit {
            warn!(used, limit, "refusing dump; storage limit reached");
            return Err(BridgeError::StorageExhausted { used, limit });
        }
        // Held from stopping the recording to closing the dump, so neither a
        // new recording nor a live event write can interleave.
        let mut persist = self.persist.lock();
        if let Some(id) = self.stop_recording_locked(&mut persist)? {
            info!(container = %id, "recording stopped to make way for a dump");
        }

        let _suspension = BufferSuspension::engage(self);
        let snapshot = self.now();

        let targets = self.dump_targets(names);
        if targets.is_empty() {
            return Err(BridgeError::NoMatchingSinks);
        }

        self.store.open(prefix)?;
        let mut total = 0;
        for (name, target) in &targets {
            match target.write_dump(snapshot) {
                Ok(written) => {
                    debug!(name = %name, written, "buffer flushed");
                    total += written;
                }
                Err(e) => {
                    error!(name = %name, error = %e, "flush failed; discarding dump");
                    if let Err(discard) = self.store.discard() {
                        warn!(error = %discard, "failed to discard partial dump");
                    }
                    return Err(e);
                }
            }
        }
        let id = self.store.close()?;
        info!(container = %id, sinks = targets.len(), samples = total, %snapshot, "dump written");
        Ok(id)
    }

    /// Recorders first, then event sources; each name at most once.
    fn dump_targets(&self, names: Option<&[String]>) -> Vec<(String, DumpTarget)> {
        let sinks = self.sinks.read();
        let mut targets = Vec::new();
        match names {
            None => {
                for (name, sink) in sinks.persist.iter() {
                    targets.push((name.to_string(), DumpTarget::Recorder(Arc::clone(sink))));
                }
                for (name, source) in sinks.events.iter() {
                    if sinks.persist.contains(name) {
                        continue;
                    }
                    targets.push((name.to_string(), DumpTarget::Event(Arc::clone(source))));
                }
            }
            Some(names) => {
                let mut seen = HashSet::new();
                for name in names {
                    if !seen.insert(name.as_str()) {
                        continue;
                    }
                    if let Some(sink) = sinks.persist.get(name) {
                        targets.push((name.clone(), DumpTarget::Recorder(Arc::clone(sink))));
                    } else if let Some(source) = sinks.events.get(name) {
                        targets.push((name.clone(), DumpTarget::Event(Arc::clone(source))));
                    } else {
                        warn!(name = %name, "nothing buffered under this name; skipped");
                    }
                }
            }
        }
        targets
    }
}
