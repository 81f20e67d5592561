//! Telemetry for the Ember client: tracing subscriber setup and an
//! in-memory metrics recorder. Nothing here persists to disk; durable
//! state is the server's job.

mod logging;
mod metrics;

pub use logging::{init, init_with, LogFormat, TelemetryConfig};
pub use metrics::{HistogramSummary, MetricSample, MetricValue, MetricsRecorder};
