//! Observability for Conductor: subscriber setup and the attribute names
//! used on control-plane spans.

pub mod span_attrs;
pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
