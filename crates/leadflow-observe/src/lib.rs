//! Observability setup for Leadflow: tracing subscriber and OpenTelemetry export.

pub mod tracing_setup;
