//! # Telemetry
//!
//! Console logging through `tracing-subscriber` is always on. Span export via
//! OpenTelemetry and the Prometheus recorder are layered on top.
//!
//! ## Feature matrix
//!
//! - `otel`: exports `tracing` spans through OpenTelemetry.
//! - `stdout`: span exporter printing to stdout.
//! - `otlp`: OTLP/gRPC span exporter, configured through the standard
//!   `OTEL_EXPORTER_OTLP_*` environment variables.
//!
//! Exporters require `otel`. Both can be enabled at the same time.
//!
//! ## Span behavior
//!
//! - Spans (e.g. the `lifecycle` span around
//!   [`Orchestrator::run`](crate::Orchestrator::run)) are exported to any
//!   enabled backend.
//! - Events outside of a span only reach the console.
//!
//! ## Metrics
//!
//! Metrics are recorded with the `metrics` facade and rendered by the
//! Prometheus recorder installed here. The text is served by the server
//! set's metrics listener when one is configured.
//!
//! ```bash
//! RUST_LOG=debug cargo run --bin inventory-srv --features otel,otlp
//! ```

#[cfg(all(any(feature = "stdout", feature = "otlp"), not(feature = "otel")))]
compile_error!("The 'stdout' and 'otlp' exporters require the 'otel' feature.");

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "otel")]
use opentelemetry::{InstrumentationScope, KeyValue, trace::TracerProvider};
#[cfg(feature = "otel")]
use opentelemetry_sdk::{Resource, propagation::TraceContextPropagator, trace as sdktrace};
#[cfg(feature = "otel")]
use opentelemetry_semantic_conventions as semvcns;

/// Handles that must outlive `main`'s work and be flushed on exit.
pub struct TelemetryProviders {
    /// Renders the process-wide metrics recorder.
    pub prometheus: PrometheusHandle,
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down exporters. Call after deregistration.
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }
    }
}

/// Installs the global subscriber and metrics recorder. Call once at startup.
///
/// # Errors
///
/// Returns an error if an exporter cannot be built or a global recorder is
/// already installed.
pub fn init_telemetry(service_name: &str) -> anyhow::Result<TelemetryProviders> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    #[cfg(feature = "otel")]
    let tracer_provider = {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        init_tracer(service_name)?
    };
    #[cfg(not(feature = "otel"))]
    let _ = service_name;

    // Human-readable console output, unrelated to the `stdout` span exporter.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "otel")]
    let registry = {
        let scope = InstrumentationScope::builder(service_name.to_string())
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope))
                .with_error_records_to_exceptions(true),
        )
    };

    registry
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(TelemetryProviders {
        prometheus,
        #[cfg(feature = "otel")]
        tracer_provider,
    })
}

#[cfg(feature = "otel")]
fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "otel")]
fn init_tracer(service_name: &str) -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource(service_name));

    #[cfg(feature = "stdout")]
    let builder = {
        let exporter = opentelemetry_stdout::SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config())
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use opentelemetry_otlp::WithExportConfig;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build tracer exporter")?;
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config())
            .build();
        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

#[cfg(all(feature = "otel", any(feature = "stdout", feature = "otlp")))]
fn batch_config() -> sdktrace::BatchConfig {
    sdktrace::BatchConfigBuilder::default()
        .with_scheduled_delay(std::time::Duration::from_secs(5))
        .with_max_queue_size(2048)
        .build()
}
