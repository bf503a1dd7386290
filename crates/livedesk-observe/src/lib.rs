//! Observability setup for Livedesk: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
