//! Prometheus metrics for the alarm persister.
//!
//! Counters are global and cheap to bump from any worker; call
//! [`init_metrics`] once at startup to register them with
//! [`PROMETHEUS_REGISTRY`] and [`gather_metrics`] to export them.
//!
//! # Example
//! ```no_run
//! use alarm_correlator::metrics::{init_metrics, gather_metrics, ALARMS_TOTAL};
//!
//! init_metrics().unwrap();
//! ALARMS_TOTAL.with_label_values(&["created"]).inc();
//! println!("{}", gather_metrics());
//! ```

use lazy_static::lazy_static;
use prometheus::{CounterVec, Histogram, HistogramOpts, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Events seen by the persister
    ///
    /// Labels: outcome (admitted, do_not_persist, no_alarm_data, illegal_id)
    pub static ref EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("events_total", "Total number of events handed to the alarm persister")
            .namespace("alarmd"),
        &["outcome"]
    ).expect("Failed to create EVENTS_TOTAL metric");

    /// Alarm lifecycle transitions
    ///
    /// Labels: transition (created, reduced, archived)
    pub static ref ALARMS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("alarms_total", "Total number of alarm lifecycle transitions")
            .namespace("alarmd"),
        &["transition"]
    ).expect("Failed to create ALARMS_TOTAL metric");

    /// Situation edges that were not linked
    ///
    /// Labels: reason (self_edge, cycle)
    pub static ref RELATED_EDGES_REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("related_edges_rejected_total", "Total number of rejected related-alarm edges")
            .namespace("alarmd"),
        &["reason"]
    ).expect("Failed to create RELATED_EDGES_REJECTED_TOTAL metric");

    /// Extension callbacks that returned an error or panicked
    ///
    /// Labels: callback (after_alarm_created, after_alarm_updated)
    pub static ref EXTENSION_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("extension_failures_total", "Total number of failed extension callbacks")
            .namespace("alarmd"),
        &["callback"]
    ).expect("Failed to create EXTENSION_FAILURES_TOTAL metric");

    /// Time spent waiting for key locks
    pub static ref LOCK_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("lock_wait_seconds", "Time spent waiting for reduction key locks")
            .namespace("alarmd")
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
    ).expect("Failed to create LOCK_WAIT_SECONDS metric");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    register(Box::new(EVENTS_TOTAL.clone()))?;
    register(Box::new(ALARMS_TOTAL.clone()))?;
    register(Box::new(RELATED_EDGES_REJECTED_TOTAL.clone()))?;
    register(Box::new(EXTENSION_FAILURES_TOTAL.clone()))?;
    register(Box::new(LOCK_WAIT_SECONDS.clone()))?;

    tracing::debug!("Alarm persister metrics registered");
    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> Result<(), prometheus::Error> {
    match PROMETHEUS_REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Export all registered metrics in Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_alarm_counters() {
        ALARMS_TOTAL.with_label_values(&["created"]).inc();

        let value = ALARMS_TOTAL.with_label_values(&["created"]).get();
        assert!(value >= 1.0);
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().unwrap();
        EVENTS_TOTAL.with_label_values(&["admitted"]).inc();

        let metrics = gather_metrics();
        assert!(metrics.contains("alarmd_events_total"));
    }
}
