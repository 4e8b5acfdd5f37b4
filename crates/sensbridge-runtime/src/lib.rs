//! `sensbridge-runtime` – Assembly & Startup
//!
//! Turns a boot configuration and a hardware session into a running bridge.
//!
//! # Modules
//!
//! - [`config`] – [`BootConfig`][config::BootConfig], the dotted-path JSON
//!   boot configuration, and [`RuntimeConfig`][config::RuntimeConfig], the
//!   typed driver, bus and container settings with `SENSBRIDGE_*`
//!   environment overrides.
//! - [`bridge`] – [`Bridge`][bridge::Bridge]: ad-hoc, batch and default
//!   converter registration on top of a [`Driver`], plus the scheduler
//!   thread.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod bridge;
pub mod config;
pub mod telemetry;

pub use bridge::{Bridge, DEFAULT_CONVERTERS, DEFAULT_SUBSCRIBERS, DefaultConverter, DefaultSource, DefaultSubscriber};
pub use config::{BootConfig, RuntimeConfig, apply_env_overrides};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};

// Re-exported so front-ends can drive the bridge without a direct dependency
// on sensbridge-kernel.
pub use sensbridge_kernel::{Driver, DriverConfig};
