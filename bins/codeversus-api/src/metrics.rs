// Prometheus metrics exposed on GET /metrics

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec, TextEncoder};

lazy_static! {
    pub static ref SUBMISSIONS_QUEUED: IntCounterVec = register_int_counter_vec!(
        "codeversus_submissions_queued_total",
        "Submissions accepted onto the judge queue",
        &["language", "mode"]
    )
    .unwrap();
    pub static ref SUBMISSIONS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "codeversus_submissions_rejected_total",
        "Submissions refused before queueing",
        &["reason"]
    )
    .unwrap();
    pub static ref REPORTS_SERVED: IntCounterVec = register_int_counter_vec!(
        "codeversus_reports_served_total",
        "Judge reports returned to clients",
        &["status"]
    )
    .unwrap();
    pub static ref CANCELLATIONS_REQUESTED: IntCounter = register_int_counter!(
        "codeversus_cancellations_requested_total",
        "Cancellation flags raised"
    )
    .unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        SUBMISSIONS_QUEUED.with_label_values(&["python", "submit"]).inc();
        CANCELLATIONS_REQUESTED.inc();

        let text = render().unwrap();
        assert!(text.contains("codeversus_submissions_queued_total"));
        assert!(text.contains("language=\"python\""));
        assert!(text.contains("codeversus_cancellations_requested_total"));
    }
}
