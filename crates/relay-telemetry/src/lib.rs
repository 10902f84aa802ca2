//! Telemetry for Relay
//!
//! Provides structured logging via the `tracing` ecosystem and optional
//! OpenTelemetry metrics/trace export. When no exporter is configured the
//! global meter stays a no-op and the pipeline's metric calls cost nothing.

mod metadata;
pub mod metrics;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use relay_config::TelemetryConfig;

pub use metrics::PipelineMetrics;
pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// Guard that shuts telemetry providers down on drop
pub struct TelemetryGuard {
    meter_provider: Option<SdkMeterProvider>,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to shutdown meter provider: {e}");
        }
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to shutdown tracer provider: {e}");
        }
    }
}

/// Initialize telemetry from configuration
///
/// Always installs an `EnvFilter`-driven fmt subscriber; installs OTLP
/// metrics and trace export only when an exporter is configured. The
/// returned guard must be held for the lifetime of the process.
///
/// # Errors
///
/// Returns an error if OTLP exporter initialization fails.
pub fn init(config: Option<&TelemetryConfig>, log_filter: &str) -> anyhow::Result<TelemetryGuard> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let mut guard = TelemetryGuard {
        meter_provider: None,
        tracer_provider: None,
    };

    match config {
        Some(telemetry_config) if telemetry_config.exporter.is_some() => {
            let resource = metadata::build_resource(telemetry_config);

            let meter_provider = init_metrics(telemetry_config, resource.clone())?;
            global::set_meter_provider(meter_provider.clone());
            guard.meter_provider = Some(meter_provider);

            let tracer_provider = init_tracer(telemetry_config, resource)?;
            let tracer = tracer_provider.tracer("relay");
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            global::set_tracer_provider(tracer_provider.clone());
            guard.tracer_provider = Some(tracer_provider);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
        }
        _ => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(guard)
}

/// Initialize OTLP metrics export
fn init_metrics(config: &TelemetryConfig, resource: opentelemetry_sdk::Resource) -> anyhow::Result<SdkMeterProvider> {
    use opentelemetry_sdk::metrics::PeriodicReader;

    let exporter_config = config
        .exporter
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no metrics exporter configured"))?;

    let exporter = build_metrics_exporter(exporter_config)?;
    let reader = PeriodicReader::builder(exporter).build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

/// Build an OTLP metrics exporter for the configured protocol
fn build_metrics_exporter(
    config: &relay_config::ExporterConfig,
) -> anyhow::Result<opentelemetry_otlp::MetricExporter> {
    use opentelemetry_otlp::MetricExporter;
    use relay_config::ExportProtocol;

    let exporter = match config.protocol {
        ExportProtocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(config.endpoint.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build gRPC metrics exporter: {e}"))?,
        ExportProtocol::HttpProto => MetricExporter::builder()
            .with_http()
            .with_endpoint(config.endpoint.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP metrics exporter: {e}"))?,
    };

    Ok(exporter)
}

/// Initialize OTLP trace export
fn init_tracer(
    config: &TelemetryConfig,
    resource: opentelemetry_sdk::Resource,
) -> anyhow::Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry_sdk::trace::SdkTracerProvider;

    let exporter_config = config
        .exporter
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no trace exporter configured"))?;

    let exporter = build_span_exporter(exporter_config)?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// Build an OTLP span exporter for the configured protocol
fn build_span_exporter(config: &relay_config::ExporterConfig) -> anyhow::Result<opentelemetry_otlp::SpanExporter> {
    use opentelemetry_otlp::SpanExporter;
    use relay_config::ExportProtocol;

    let exporter = match config.protocol {
        ExportProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(config.endpoint.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build gRPC span exporter: {e}"))?,
        ExportProtocol::HttpProto => SpanExporter::builder()
            .with_http()
            .with_endpoint(config.endpoint.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP span exporter: {e}"))?,
    };

    Ok(exporter)
}
