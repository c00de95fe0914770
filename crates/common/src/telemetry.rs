use crate::{
    Environment,
    logging::{env_filter, fmt_layer},
};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// OTLP export for the supervisor process.
///
/// Spans: every `tracing` span is bridged to OpenTelemetry, so each worker
/// thread exports its `worker` span (with `worker_id` and `accelerator`) and
/// the `worker_drain` span emitted on shutdown.
///
/// Metrics, pushed every 10 seconds through the global meter provider:
/// - `results_dropped_total`: events discarded because the result channel was
///   full
/// - `supervisor_commands_dispatched_total` by `command`, and
///   `supervisor_commands_rejected_total` by `reason`
/// - `worker_frames_total`, `worker_detections_total`,
///   `worker_inference_errors_total`, `worker_reconnect_failures_total` and
///   the `worker_inference_duration_seconds` histogram, labelled with
///   `worker_id` and `accelerator`
///
/// Every exported item carries the `service.name`, `service.version` and
/// `deployment.environment` resource attributes. Dropping the guard flushes
/// and shuts down both providers. The exporters are async: a Tokio runtime
/// must outlive the guard.
///
/// ```ignore
/// let _telemetry = TelemetryGuard::init("stream-supervisor", "http://localhost:4317", Environment::Production)?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Install the providers and the global subscriber. Fails if either
    /// exporter cannot be built or a subscriber is already installed.
    pub fn init(
        service_name: &str,
        endpoint: &str,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let resource = resource(service_name, environment);
        let tracer_provider = tracer_provider(endpoint, resource.clone())?;
        let meter_provider = meter_provider(endpoint, resource)?;
        global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());

        let otel_layer =
            tracing_opentelemetry::layer().with_tracer(global::tracer(service_name.to_string()));

        tracing_subscriber::registry()
            .with(env_filter())
            .with(otel_layer)
            .with(fmt_layer(environment))
            .try_init()?;

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

fn resource(service_name: &str, environment: Environment) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
                service_name.to_string(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
            KeyValue::new("deployment.environment", environment.as_str()),
        ])
        .build()
}

fn tracer_provider(endpoint: &str, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(endpoint: &str, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to flush spans on shutdown: {e:?}");
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to flush metrics on shutdown: {e:?}");
        }
    }
}

/// Enter an info-level span for the rest of the enclosing scope, e.g.
/// `let _span = common::span!("worker_drain");`.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
}
