//! [`Converter`] – the generic periodic [`Task`].
//!
//! A converter pairs a [`Sampler`] (pull + format conversion) with the
//! sinks of its name: an optional [`BusPublisher`] and an optional
//! [`BufferedRecorder`]. The sinks are shared `Arc`s; the same instances go
//! into the driver's registries through [`Converter::register`].

use std::sync::Arc;

use serde::Serialize;
use sensbridge_kernel::{BufferedRecorder, BusPublisher, Dispatch, Driver, Task};
use sensbridge_types::{Action, BridgeError, Timestamp};
use tracing::warn;

/// Produces one message per dispatch. `None` means "no sample this tick".
pub trait Sampler<M>: Send {
    fn sample(&mut self, stamp: Timestamp) -> Option<M>;
}

impl<M, F> Sampler<M> for F
where
    F: FnMut(Timestamp) -> Option<M> + Send,
{
    fn sample(&mut self, stamp: Timestamp) -> Option<M> {
        self(stamp)
    }
}

pub struct Converter<M> {
    name: String,
    frequency: f64,
    sampler: Box<dyn Sampler<M>>,
    publisher: Option<Arc<BusPublisher<M>>>,
    recorder: Option<Arc<BufferedRecorder<M>>>,
}

impl<M> Converter<M>
where
    M: Serialize + Send + 'static,
{
    pub fn new(name: &str, frequency: f64, sampler: impl Sampler<M> + 'static) -> Self {
        Self {
            name: name.to_string(),
            frequency,
            sampler: Box::new(sampler),
            publisher: None,
            recorder: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<BusPublisher<M>>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<BufferedRecorder<M>>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn publisher(&self) -> Option<&Arc<BusPublisher<M>>> {
        self.publisher.as_ref()
    }

    pub fn recorder(&self) -> Option<&Arc<BufferedRecorder<M>>> {
        self.recorder.as_ref()
    }

    /// Hand the task and its sinks to `driver` as one converter.
    pub fn register(self, driver: &Driver) -> Result<usize, BridgeError> {
        let emit = self
            .publisher
            .clone()
            .map(|p| p as Arc<dyn sensbridge_kernel::EmitSink>);
        let persist = self
            .recorder
            .clone()
            .map(|r| r as Arc<dyn sensbridge_kernel::PersistSink>);
        driver.register_converter(Box::new(self), emit, persist)
    }
}

impl<M> Task for Converter<M>
where
    M: Serialize + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn invoke(&mut self, dispatch: &Dispatch) {
        let Some(message) = self.sampler.sample(dispatch.fire_time) else {
            return;
        };
        let stamp = dispatch.fire_time;
        if dispatch.actions.contains(Action::Emit) {
            if let Some(publisher) = &self.publisher {
                if let Err(e) = publisher.publish(stamp, &message) {
                    warn!(task = %self.name, error = %e, "emit failed");
                }
            }
        }
        if dispatch.actions.contains(Action::Persist) {
            if let Some(recorder) = &self.recorder {
                if let Err(e) = recorder.write(stamp, &message) {
                    warn!(task = %self.name, error = %e, "persist failed");
                }
            }
        }
        if dispatch.actions.contains(Action::Buffer) {
            if let Some(recorder) = &self.recorder {
                recorder.buffer(stamp, message);
            }
        }
    }
}
