//! Prometheus metrics for the queue core.
//!
//! Counters cover the message lifecycle (enqueued, dequeued, retried, dead)
//! and lock contention; the histogram tracks handler latency. Registered on
//! the default registry so an embedding application can expose them with
//! its own scrape endpoint.

use lazy_static::lazy_static;
use prometheus::{register_histogram, register_int_counter, Histogram, IntCounter};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relayq";

lazy_static! {
    /// Total messages enqueued across all queues and consumers
    pub static ref MESSAGES_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_enqueued_total", METRIC_PREFIX),
        "Total messages enqueued"
    ).unwrap();

    /// Total messages dequeued
    pub static ref MESSAGES_DEQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_dequeued_total", METRIC_PREFIX),
        "Total messages dequeued"
    ).unwrap();

    /// Total messages requeued after a recoverable handler failure
    pub static ref MESSAGES_RETRIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_retried_total", METRIC_PREFIX),
        "Total messages requeued for retry"
    ).unwrap();

    /// Total messages surfaced as terminal failures
    pub static ref MESSAGES_DEAD_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_dead_total", METRIC_PREFIX),
        "Total messages dropped after a terminal failure"
    ).unwrap();

    /// Total sequential-lock acquisition timeouts
    pub static ref LOCK_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_lock_timeouts_total", METRIC_PREFIX),
        "Total sequential lock acquisition timeouts"
    ).unwrap();

    /// Handler invocation latency
    pub static ref HANDLER_DURATION_SECONDS: Histogram = register_histogram!(
        format!("{}_handler_duration_seconds", METRIC_PREFIX),
        "Application handler latency in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_once() {
        let before = MESSAGES_ENQUEUED_TOTAL.get();
        MESSAGES_ENQUEUED_TOTAL.inc();
        assert_eq!(MESSAGES_ENQUEUED_TOTAL.get(), before + 1);
    }
}
