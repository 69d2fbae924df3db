use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Request instruments, labelled by route.
#[derive(Clone)]
pub struct Metrics {
    pub requests: Counter<u64>,
    pub errors: Counter<u64>,
    pub latency_ms: Histogram<f64>,
}

impl Metrics {
    pub fn from_meter(meter: &Meter) -> Self {
        let requests = meter
            .u64_counter("copilot.gateway.requests")
            .with_description("Total forwarded requests")
            .build();
        let errors = meter
            .u64_counter("copilot.gateway.errors")
            .with_description("Total failed requests")
            .build();
        let latency_ms = meter
            .f64_histogram("copilot.gateway.latency_ms")
            .with_unit("ms")
            .with_description("Request latency in ms")
            .build();
        Self {
            requests,
            errors,
            latency_ms,
        }
    }

    pub fn record_request(&self, route: &'static str) {
        self.requests.add(1, &[KeyValue::new("route", route)]);
    }

    pub fn record_error(&self, route: &'static str, kind: &'static str) {
        self.errors.add(
            1,
            &[KeyValue::new("route", route), KeyValue::new("kind", kind)],
        );
    }

    pub fn record_latency(&self, route: &'static str, latency_ms: f64) {
        self.latency_ms
            .record(latency_ms, &[KeyValue::new("route", route)]);
    }
}

/// Instruments on the global meter provider; no-op until an exporter is installed.
pub fn init_metrics_noop() -> Metrics {
    Metrics::from_meter(&opentelemetry::global::meter("copilot-gateway"))
}
