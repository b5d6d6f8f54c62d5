use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = PROM_HANDLE.set(handle);
    }
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    describe_counter!("http_requests_total", "HTTP responses by status code");
    describe_histogram!("http_request_duration_seconds", "HTTP latency by status code");
    describe_counter!("violations_recorded_total", "Accepted proctoring violations by severity");
    describe_counter!("violations_rejected_total", "Dropped violation events by reason");
    describe_counter!("sessions_finalized_total", "Sessions moved to a terminal status");
    describe_counter!("results_created_total", "Results persisted by the submission path");
    describe_counter!("results_replayed_total", "Submissions answered from an existing result");
    describe_counter!("counter_increment_retries_total", "Retried warning counter increments");
    describe_counter!("sessions_abandoned_total", "Sessions closed by the abandonment sweep");
}
