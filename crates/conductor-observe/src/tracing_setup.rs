//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use conductor_observe::tracing_setup::{TracingOptions, init_tracing};
//!
//! // Human-readable logs at `info` unless RUST_LOG says otherwise
//! init_tracing(&TracingOptions::default()).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::sync::OnceLock;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Service name reported on exported spans.
pub const SERVICE_NAME: &str = "conductor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingOptions {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `"debug"`).
    pub default_directive: String,
    /// Emit one JSON object per event instead of the human format.
    pub json: bool,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub otel: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            json: false,
            otel: false,
        }
    }
}

impl TracingOptions {
    /// Map a `-v` count to a directive: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
    pub fn from_verbosity(verbose: u8) -> Self {
        let directive = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Self {
            default_directive: directive.to_string(),
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Initialize the global tracing subscriber.
///
/// - Installs a `fmt` layer (human or JSON) with target visibility and span
///   close timing, writing to stderr so command output on stdout stays clean.
/// - When `options.otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter.
/// - `RUST_LOG` takes precedence over `options.default_directive`.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let human_layer = (!options.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let json_layer = options.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
    });

    let otel_layer = if options.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer(SERVICE_NAME);

        // Store the provider for shutdown and register it globally.
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(options.env_filter())
        .with(human_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingOptions::from_verbosity(0).default_directive, "warn");
        assert_eq!(TracingOptions::from_verbosity(1).default_directive, "info");
        assert_eq!(TracingOptions::from_verbosity(2).default_directive, "debug");
        assert_eq!(TracingOptions::from_verbosity(7).default_directive, "trace");
        assert!(!TracingOptions::from_verbosity(2).otel);
    }

    #[test]
    fn test_shutdown_without_otel_is_noop() {
        shutdown_tracing();
    }
}
