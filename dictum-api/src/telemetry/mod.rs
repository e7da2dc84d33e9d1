//! DICTUM Telemetry - Logging Infrastructure
//!
//! Structured `tracing` output for the API layer, JSON by default.

pub mod tracer;

pub use tracer::{init_tracing, TelemetryConfig};
