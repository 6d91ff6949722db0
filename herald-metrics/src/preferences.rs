//! Notification preference metrics

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

use crate::MetricsError;

/// Preference updates, suppressed notifications and lookup failures
#[derive(Debug)]
pub struct PreferenceMetrics {
    updated_total: Counter<u64>,
    bulk_updated_total: Counter<u64>,
    suppressed_total: Counter<u64>,
    errors_total: Counter<u64>,
}

impl PreferenceMetrics {
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        Ok(Self {
            updated_total: meter
                .u64_counter("herald.preferences.updated.total")
                .with_description("Total number of notification preference updates")
                .build(),
            bulk_updated_total: meter
                .u64_counter("herald.preferences.bulk_updated.total")
                .with_description("Total number of users updated through bulk preference updates")
                .build(),
            suppressed_total: meter
                .u64_counter("herald.preferences.suppressed.total")
                .with_description("Notifications skipped because the user opted out, by channel and type")
                .build(),
            errors_total: meter
                .u64_counter("herald.preferences.errors.total")
                .with_description("Total number of preference errors by operation")
                .build(),
        })
    }

    pub fn record_updated(&self) {
        self.updated_total.add(1, &[]);
    }

    pub fn record_bulk_updated(&self, count: u64) {
        self.bulk_updated_total.add(count, &[]);
    }

    pub fn record_suppressed(&self, channel: &str, kind: &str) {
        self.suppressed_total.add(
            1,
            &[
                KeyValue::new("channel", channel.to_string()),
                KeyValue::new("type", kind.to_string()),
            ],
        );
    }

    pub fn record_error(&self, operation: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("operation", operation.to_string())]);
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("herald.preferences")
}
