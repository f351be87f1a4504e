// Prometheus metrics for the fleet and its pools.
//
// Grounded on `metrics.rs` (`lazy_static` registry, gather via
// `TextEncoder`); the metric names and label sets follow spec §6.

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, GaugeVec, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref SERVER_UP: IntGauge = IntGauge::new(
        "fireactions_server_up",
        "1 when the server is accepting requests"
    ).expect("failed to create fireactions_server_up metric");

    pub static ref POOL_TOTAL: IntGauge = IntGauge::new(
        "fireactions_pool_total",
        "Number of pools owned by the fleet"
    ).expect("failed to create fireactions_pool_total metric");

    pub static ref POOL_MAX_RUNNERS: GaugeVec = GaugeVec::new(
        prometheus::Opts::new("fireactions_pool_max_runners_count", "Configured max_runners for a pool"),
        &["pool"]
    ).expect("failed to create fireactions_pool_max_runners_count metric");

    pub static ref POOL_MIN_RUNNERS: GaugeVec = GaugeVec::new(
        prometheus::Opts::new("fireactions_pool_min_runners_count", "Configured min_runners for a pool"),
        &["pool"]
    ).expect("failed to create fireactions_pool_min_runners_count metric");

    pub static ref POOL_CURRENT_RUNNERS: GaugeVec = GaugeVec::new(
        prometheus::Opts::new("fireactions_pool_current_runners_count", "Current registered runner count for a pool"),
        &["pool"]
    ).expect("failed to create fireactions_pool_current_runners_count metric");

    pub static ref POOL_STATUS: GaugeVec = GaugeVec::new(
        prometheus::Opts::new("fireactions_pool_status", "0=paused, 1=active"),
        &["pool"]
    ).expect("failed to create fireactions_pool_status metric");

    pub static ref POOL_SCALE_REQUESTS: CounterVec = CounterVec::new(
        prometheus::Opts::new("fireactions_pool_scale_requests_total", "Total scale requests received"),
        &["pool"]
    ).expect("failed to create fireactions_pool_scale_requests_total metric");

    pub static ref POOL_SCALE_SUCCESSES: CounterVec = CounterVec::new(
        prometheus::Opts::new("fireactions_pool_scale_successes_total", "Total successful scale-ups"),
        &["pool"]
    ).expect("failed to create fireactions_pool_scale_successes_total metric");

    pub static ref POOL_SCALE_FAILURES: CounterVec = CounterVec::new(
        prometheus::Opts::new("fireactions_pool_scale_failures_total", "Total failed scale-ups"),
        &["pool"]
    ).expect("failed to create fireactions_pool_scale_failures_total metric");
}

/// Registers every metric. Must be called once at startup, before any pool
/// reconciliation task publishes a sample.
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(SERVER_UP.clone()))?;
    REGISTRY.register(Box::new(POOL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POOL_MAX_RUNNERS.clone()))?;
    REGISTRY.register(Box::new(POOL_MIN_RUNNERS.clone()))?;
    REGISTRY.register(Box::new(POOL_CURRENT_RUNNERS.clone()))?;
    REGISTRY.register(Box::new(POOL_STATUS.clone()))?;
    REGISTRY.register(Box::new(POOL_SCALE_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(POOL_SCALE_SUCCESSES.clone()))?;
    REGISTRY.register(Box::new(POOL_SCALE_FAILURES.clone()))?;
    Ok(())
}

/// Gathers all metrics in Prometheus text exposition format.
pub fn gather() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_gauges_accept_labels() {
        let _ = init();
        POOL_CURRENT_RUNNERS.with_label_values(&["p"]).set(2.0);
        POOL_STATUS.with_label_values(&["p"]).set(1.0);
        assert_eq!(POOL_CURRENT_RUNNERS.with_label_values(&["p"]).get(), 2.0);
    }

    #[test]
    fn gather_produces_text_exposition() {
        let _ = init();
        SERVER_UP.set(1);
        let text = gather().unwrap();
        assert!(text.contains("fireactions_server_up"));
    }
}
