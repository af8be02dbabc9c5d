use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::TelemetrySettings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init(telemetry: &TelemetrySettings) -> anyhow::Result<()> {
    if !telemetry.prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

fn describe() {
    describe_counter!("photo_checks_total", "Finished photo checks by status and quality level");
    describe_counter!("photo_check_cache_hits_total", "Checks answered from the result cache");
    describe_counter!("ai_completion_attempts_total", "AI completion attempts by outcome");
    describe_counter!("ai_fallback_total", "AI-tier checks scored heuristically, by reason");
    describe_counter!("ocr_pass_failures_total", "Failed OCR passes by page layout");
    describe_histogram!(
        "photo_check_duration_seconds",
        Unit::Seconds,
        "Wall-clock time of a photo check"
    );
}

/// Prometheus text exposition of everything recorded so far, when enabled.
pub fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
