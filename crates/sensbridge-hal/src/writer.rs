//! [`MemoryWriter`] – an [`InboundSubscriber`] that writes bus messages into
//! one memory key of the session.
//!
//! Each attachment runs a small forwarding thread. It waits on the bus topic
//! and on a stop signal at the same time, so detaching never hangs on a quiet
//! topic. Payloads that do not fit the writer's kind are dropped; with
//! [`DataKind::None`] any payload is written as is.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use sensbridge_kernel::InboundSubscriber;
use sensbridge_middleware::{EventBus, TopicReceiver};
use sensbridge_types::{BridgeError, DataKind, Envelope, TypedValue};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::kind::coerce;
use crate::session::{HardwareSession, RawValue};

struct Forwarder {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Target {
    name: String,
    key: String,
    kind: DataKind,
    session: Arc<dyn HardwareSession>,
}

impl Target {
    fn forward(&self, envelope: Envelope) {
        let value = match self.kind {
            DataKind::None => envelope.payload,
            kind => match coerce(&envelope.payload, kind) {
                Some(typed) => to_raw(typed),
                None => {
                    debug!(subscriber = %self.name, payload = %envelope.payload, "payload does not fit its kind; dropped");
                    return;
                }
            },
        };
        match self.session.set_data(&self.key, value) {
            Ok(()) => trace!(subscriber = %self.name, key = %self.key, "inbound value written"),
            Err(e) => warn!(subscriber = %self.name, key = %self.key, error = %e, "inbound write failed"),
        }
    }

    async fn pump(&self, mut rx: TopicReceiver, mut stop: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut stop => break,
                message = rx.recv() => match message {
                    Some(envelope) => self.forward(envelope),
                    None => break,
                },
            }
        }
    }
}

fn to_raw(value: TypedValue) -> RawValue {
    match value {
        TypedValue::Float(f) => RawValue::from(f),
        TypedValue::Int(i) => RawValue::from(i),
        TypedValue::String(s) => RawValue::from(s),
        TypedValue::Bool(b) => RawValue::from(b),
    }
}

/// Writes every message on `topic` into `key`.
pub struct MemoryWriter {
    topic: String,
    target: Arc<Target>,
    forwarder: Mutex<Option<Forwarder>>,
}

impl MemoryWriter {
    pub fn new(session: Arc<dyn HardwareSession>, name: &str, topic: &str, key: &str, kind: DataKind) -> Self {
        Self {
            topic: topic.to_string(),
            target: Arc::new(Target {
                name: name.to_string(),
                key: key.to_string(),
                kind,
                session,
            }),
            forwarder: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.target.key
    }

    fn start_failed(&self, details: String) -> BridgeError {
        BridgeError::BackgroundStartFailed {
            name: self.target.name.clone(),
            details,
        }
    }
}

fn halt(name: &str, forwarder: Forwarder) {
    let _ = forwarder.stop.send(());
    if forwarder.handle.join().is_err() {
        error!(subscriber = %name, "inbound forwarder panicked");
    }
}

impl InboundSubscriber for MemoryWriter {
    fn name(&self) -> &str {
        &self.target.name
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn reset(&self, bus: &EventBus) -> Result<(), BridgeError> {
        let mut forwarder = self.forwarder.lock();
        if let Some(previous) = forwarder.take() {
            halt(&self.target.name, previous);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| self.start_failed(e.to_string()))?;
        let rx = bus.subscribe(&self.topic);
        let (stop_tx, stop_rx) = oneshot::channel();
        let target = Arc::clone(&self.target);
        let handle = thread::Builder::new()
            .name(format!("inbound-{}", self.target.name))
            .spawn(move || runtime.block_on(target.pump(rx, stop_rx)))
            .map_err(|e| self.start_failed(e.to_string()))?;

        *forwarder = Some(Forwarder { stop: stop_tx, handle });
        debug!(subscriber = %self.target.name, topic = %self.topic, key = %self.target.key, "inbound subscriber attached");
        Ok(())
    }

    fn shutdown(&self) {
        if let Some(forwarder) = self.forwarder.lock().take() {
            halt(&self.target.name, forwarder);
            debug!(subscriber = %self.target.name, "inbound subscriber detached");
        }
    }

    fn is_subscribed(&self) -> bool {
        self.forwarder.lock().is_some()
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.get_mut().take() {
            let _ = forwarder.stop.send(());
        }
    }
}
