// Prometheus counters exposed on GET /metrics

use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

lazy_static! {
    pub static ref RUNS_QUEUED: IntCounter = register_int_counter!(
        "lessonrun_runs_queued_total",
        "Run requests pushed onto the queue"
    )
    .expect("metric can be registered");
    pub static ref CANCELLATIONS_REQUESTED: IntCounter = register_int_counter!(
        "lessonrun_cancellations_requested_total",
        "Cancellation flags set for live runs"
    )
    .expect("metric can be registered");
}

/// Render the default registry in the text exposition format
pub fn render() -> prometheus::Result<String> {
    // Touch the counters so they are registered before the first request
    lazy_static::initialize(&RUNS_QUEUED);
    lazy_static::initialize(&CANCELLATIONS_REQUESTED);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
