//! Scheduled notification metrics

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

use crate::MetricsError;

/// Scheduling API and redelivery loop metrics collector
#[derive(Debug)]
pub struct ScheduledMetrics {
    created_total: Counter<u64>,
    bulk_created_total: Counter<u64>,
    cancelled_total: Counter<u64>,
    rescheduled_total: Counter<u64>,
    processed_total: Counter<u64>,
    failed_total: Counter<u64>,
    errors_total: Counter<u64>,
}

impl ScheduledMetrics {
    /// Create a new scheduled notification metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let counter = |name: &'static str, description: &'static str| {
            meter.u64_counter(name).with_description(description).build()
        };

        Ok(Self {
            created_total: counter(
                "herald.scheduled.created.total",
                "Total number of scheduled notifications created by type",
            ),
            bulk_created_total: counter(
                "herald.scheduled.bulk_created.total",
                "Total number of scheduled notifications created through bulk scheduling",
            ),
            cancelled_total: counter(
                "herald.scheduled.cancelled.total",
                "Total number of scheduled notifications cancelled",
            ),
            rescheduled_total: counter(
                "herald.scheduled.rescheduled.total",
                "Total number of scheduled notifications rescheduled",
            ),
            processed_total: counter(
                "herald.scheduled.processed.total",
                "Total number of scheduled notifications delivered by type",
            ),
            failed_total: counter(
                "herald.scheduled.failed.total",
                "Total number of scheduled notifications that exhausted their retries",
            ),
            errors_total: counter(
                "herald.scheduled.errors.total",
                "Total number of scheduling errors by operation",
            ),
        })
    }

    pub fn record_created(&self, kind: &str) {
        self.created_total
            .add(1, &[KeyValue::new("type", kind.to_string())]);
    }

    pub fn record_bulk_created(&self, count: u64) {
        self.bulk_created_total.add(count, &[]);
    }

    pub fn record_cancelled(&self) {
        self.cancelled_total.add(1, &[]);
    }

    pub fn record_rescheduled(&self) {
        self.rescheduled_total.add(1, &[]);
    }

    pub fn record_processed(&self, kind: &str) {
        self.processed_total
            .add(1, &[KeyValue::new("type", kind.to_string())]);
    }

    pub fn record_failed(&self, kind: &str) {
        self.failed_total
            .add(1, &[KeyValue::new("type", kind.to_string())]);
    }

    pub fn record_error(&self, operation: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("operation", operation.to_string())]);
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("herald.scheduled")
}
