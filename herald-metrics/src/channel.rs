//! Channel sender metrics

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

use crate::MetricsError;

/// Email and SMS sender metrics collector
#[derive(Debug)]
pub struct ChannelMetrics {
    sent_total: Counter<u64>,
    errors_total: Counter<u64>,
    send_duration_seconds: Histogram<f64>,
}

impl ChannelMetrics {
    /// Create a new channel metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let sent_total = meter
            .u64_counter("herald.channel.sent.total")
            .with_description("Total number of notifications sent by channel and type")
            .build();

        let errors_total = meter
            .u64_counter("herald.channel.errors.total")
            .with_description("Total number of notifications that failed by channel and type")
            .build();

        let send_duration_seconds = meter
            .f64_histogram("herald.channel.send.duration.seconds")
            .with_description("Distribution of end-to-end send durations, retries included")
            .build();

        Ok(Self {
            sent_total,
            errors_total,
            send_duration_seconds,
        })
    }

    pub fn record_sent(&self, channel: &str, kind: &str, duration_secs: f64) {
        let attributes = [
            KeyValue::new("channel", channel.to_string()),
            KeyValue::new("type", kind.to_string()),
        ];
        self.sent_total.add(1, &attributes);
        self.send_duration_seconds.record(duration_secs, &attributes);
    }

    pub fn record_error(&self, channel: &str, kind: &str, class: &str) {
        let attributes = [
            KeyValue::new("channel", channel.to_string()),
            KeyValue::new("type", kind.to_string()),
            KeyValue::new("class", class.to_string()),
        ];
        self.errors_total.add(1, &attributes);
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("herald.channel")
}
