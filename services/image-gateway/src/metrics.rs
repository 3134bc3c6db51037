//! Prometheus metrics exposition
//!
//! Metrics recorded by the gateway itself:
//!
//! - `generation_requests_total` (counter): labels `status`, `route`
//! - `generation_request_duration_seconds` (histogram): label `status`
//!
//! The key pool records its own counters (`pool_dispatch_attempts_total`,
//! `pool_requeues_total`, `pool_requests_total`) through the same recorder.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram buckets for a whole generation request, retries and window
/// waits included, up to the default request deadline.
const DURATION_BUCKETS: &[f64] = &[
    0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 90.0, 120.0, 180.0,
];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("generation_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )?)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The handle's `render()` method produces the Prometheus text exposition
/// format served on `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder()?.install_recorder()?)
}

/// Record a completed generation request.
pub fn record_request(status: u16, route: &'static str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("generation_requests_total", "status" => status_str.clone(), "route" => route)
        .increment(1);
    metrics::histogram!("generation_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Uses build_recorder() rather than install_recorder(): only one global
    /// recorder can exist per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_does_not_panic_without_recorder() {
        record_request(200, "generate", 0.5);
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "generate", 4.2);
        record_request(503, "generate", 0.01);

        let output = handle.render();
        assert!(output.contains("generation_requests_total"));
        assert!(output.contains("status=\"200\""));
        assert!(output.contains("status=\"503\""));
        assert!(output.contains("route=\"generate\""));
        assert!(
            output.contains("generation_request_duration_seconds_bucket"),
            "histogram must render _bucket lines for histogram_quantile() queries"
        );
    }

    #[test]
    fn histogram_buckets_cover_request_deadline() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "generate", 0.1);

        let output = handle.render();
        assert!(output.contains("le=\"0.25\""), "250ms bucket must exist");
        assert!(output.contains("le=\"180\""), "180s bucket must exist");
        assert!(output.contains("le=\"+Inf\""));
    }
}
