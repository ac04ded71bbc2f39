//! Prometheus recorder for the client counters
//!
//! Installed only with `--metrics`. The counters recorded by
//! `campus_client::metrics` during the run are rendered to stderr on exit.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return its render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test in this binary that touches the global recorder.
    #[test]
    fn installed_recorder_captures_client_counters() {
        let handle = install_recorder().unwrap();
        campus_client::metrics::record_retry();
        campus_client::metrics::record_outcome("fresh");

        let output = handle.render();
        assert!(output.contains("campus_retries_total 1"), "got: {output}");
        assert!(output.contains("campus_requests_total"), "got: {output}");
        assert!(output.contains(r#"outcome="fresh""#), "got: {output}");
    }
}
