//! OpenTelemetry exporters for spans and metrics.
//!
//! Both signals share the exporter selection in `observability.exporters`: `none` keeps
//! everything in-process, `otlp_grpc` ships over tonic, and `langfuse_http` posts
//! protobuf over HTTP with basic auth.

use base64::Engine;
use opentelemetry::global;
use opentelemetry::metrics::MeterProvider;
use opentelemetry_otlp::{MetricExporter, Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::metrics::periodic_reader_with_async_runtime::PeriodicReader;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::trace::span_processor_with_async_runtime::BatchSpanProcessor;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use crate::config::{ObservabilityConfig, OtlpHttpConfig};
use crate::metrics::{Metrics, init_metrics_noop};

pub fn init_tracer(observability: &ObservabilityConfig) -> Result<SdkTracerProvider, String> {
    let exporter = match observability.exporters.tracing.as_str() {
        "none" => return Ok(init_tracer_noop(observability.service_name.clone())),
        "langfuse_http" => SpanExporter::builder()
            .with_http()
            .with_endpoint(observability.otlp_http.traces_endpoint())
            .with_protocol(Protocol::HttpBinary)
            .with_timeout(Duration::from_millis(observability.otlp_http.timeout_ms))
            .with_headers(basic_auth_headers(&observability.otlp_http))
            .build(),
        _ => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(observability.otlp_grpc.endpoint.clone())
            .with_timeout(Duration::from_millis(observability.otlp_grpc.timeout_ms))
            .build(),
    }
    .map_err(|e| format!("trace exporter init error: {}", e))?;

    let batch = BatchSpanProcessor::builder(exporter, runtime::Tokio).build();
    let provider = SdkTracerProvider::builder()
        .with_span_processor(batch)
        .with_resource(service_resource(observability.service_name.clone()))
        .build();

    hold_tracer_provider(provider.clone());
    Ok(provider)
}

pub fn init_tracer_noop(service_name: String) -> SdkTracerProvider {
    let provider = SdkTracerProvider::builder()
        .with_resource(service_resource(service_name))
        .build();
    hold_tracer_provider(provider.clone());
    provider
}

pub fn init_metrics(observability: &ObservabilityConfig) -> Result<Metrics, String> {
    let exporter = match observability.exporters.metrics.as_str() {
        "none" => return Ok(init_metrics_noop()),
        "langfuse_http" => MetricExporter::builder()
            .with_http()
            .with_endpoint(observability.otlp_http.metrics_endpoint())
            .with_protocol(Protocol::HttpBinary)
            .with_timeout(Duration::from_millis(observability.otlp_http.timeout_ms))
            .with_headers(basic_auth_headers(&observability.otlp_http))
            .build(),
        _ => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(observability.otlp_grpc.endpoint.clone())
            .with_protocol(Protocol::Grpc)
            .with_timeout(Duration::from_millis(observability.otlp_grpc.timeout_ms))
            .build(),
    }
    .map_err(|e| format!("metrics exporter init error: {}", e))?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(service_resource(observability.service_name.clone()))
        .build();
    let meter = provider.meter("copilot-gateway");
    global::set_meter_provider(provider);

    Ok(Metrics::from_meter(&meter))
}

pub fn spawn_tracer_watchdog(provider: SdkTracerProvider) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(30));
        if let Err(err) = provider.force_flush() {
            warn!("tracer provider force_flush failed: {}", err);
        }
    })
}

fn basic_auth_headers(http: &OtlpHttpConfig) -> HashMap<String, String> {
    let auth = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", http.public_key, http.secret_key));
    HashMap::from([(String::from("Authorization"), format!("Basic {}", auth))])
}

fn service_resource(service_name: String) -> Resource {
    Resource::builder().with_service_name(service_name).build()
}

fn hold_tracer_provider(provider: SdkTracerProvider) {
    static GLOBAL_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();
    let _ = GLOBAL_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider);
}
