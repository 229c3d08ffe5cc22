//! Process-wide log and span output for Leadflow binaries.
//!
//! Logs go to stderr in the human `fmt` format or as newline-delimited JSON.
//! Spans can additionally be bridged to OpenTelemetry and printed by the
//! stdout exporter, tagged with `service.name = leadflow`.
//!
//! # Usage
//!
//! ```no_run
//! use leadflow_observe::tracing_setup::{init_tracing, TracingOptions};
//!
//! // Human-readable logs at `info`
//! init_tracing(&TracingOptions::default()).unwrap();
//! ```
//!
//! A worker running under a log collector would instead pass
//! `TracingOptions { json: true, ..Default::default() }`.

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const SERVICE_NAME: &str = "leadflow";

/// Kept so `shutdown_tracing` can flush buffered spans.
static OTEL_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Subscriber settings chosen by the binary at startup.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Bridge spans to OpenTelemetry with the stdout exporter.
    pub otel: bool,
    /// Emit newline-delimited JSON instead of the human format.
    pub json: bool,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_directive: String,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            otel: false,
            json: false,
            default_directive: "info".to_string(),
        }
    }
}

/// `RUST_LOG` wins, otherwise the caller's default.
fn build_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer(json: bool) -> BoxedLayer {
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        base.json().with_current_span(true).flatten_event(true).boxed()
    } else {
        // Close events give a duration for every request and job span.
        base.with_span_events(FmtSpan::CLOSE).boxed()
    }
}

fn otel_layer() -> BoxedLayer {
    let provider = SdkTracerProvider::builder()
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();
    let tracer = provider.tracer(SERVICE_NAME);
    if OTEL_PROVIDER.set(provider.clone()).is_ok() {
        opentelemetry::global::set_tracer_provider(provider);
    }
    tracing_opentelemetry::layer().with_tracer(tracer).boxed()
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut layers = vec![output_layer(options.json)];
    if options.otel {
        layers.push(otel_layer());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&options.default_directive))
        .try_init()?;
    Ok(())
}

/// Flush and stop the OpenTelemetry provider. No-op without `otel`.
pub fn shutdown_tracing() {
    let Some(provider) = OTEL_PROVIDER.get() else {
        return;
    };
    if let Err(e) = provider.shutdown() {
        eprintln!("leadflow: span exporter did not shut down cleanly: {e}");
    }
}
