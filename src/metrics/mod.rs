use autometrics::prometheus_exporter::{self, PrometheusResponse};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tracing::error;

lazy_static! {
    pub static ref WATCH_EVENTS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_events_delivered", "watch events delivered, by type"),
        &["event_type"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_GAP_METRIC: IntCounter = IntCounter::new(
        "watch_gaps_recovered",
        "watch streams that fell out of the backend history window and resumed"
    )
    .expect("metric can not be created");

    pub static ref LOCKS_HELD_METRIC: IntGauge =
        IntGauge::new("locks_held", "locks currently under maintenance")
            .expect("metric can not be created");

    pub static ref LOCKS_LOST_METRIC: IntCounter =
        IntCounter::new("locks_lost", "locks lost to expiry or tampering")
            .expect("metric can not be created");

    pub static ref LOCK_REFRESH_FAILURES_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("lock_refresh_failures", "lock refresh failures, by reason"),
        &["reason"]
    )
    .expect("Should succeed to create metric");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub fn register_custom_metrics() {
    REGISTRY
        .register(Box::new(WATCH_EVENTS_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(WATCH_GAP_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(LOCKS_HELD_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(LOCKS_LOST_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(LOCK_REFRESH_FAILURES_METRIC.clone()))
        .expect("collector can be registered");
}

/// Render every collector in text exposition format.
///
/// The embedding process owns the scrape endpoint; this only produces the
/// body.
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    let mut body = match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };

    body.push_str(&get_metrics_body());
    body
}

/// Export metrics for Prometheus to scrape
pub fn get_metrics_body() -> String {
    let autometrics_response = prometheus_exporter::encode_http_response();
    autometrics_response.into_body()
}
/// Export metrics for Prometheus to scrape
pub fn get_metrics() -> PrometheusResponse {
    prometheus_exporter::encode_http_response()
}
