//! Dispatch queue metrics
//!
//! Tracks the in-memory priority queue:
//! - Current depth (observable gauge)
//! - Rejections because the queue was full
//! - Processed and failed jobs by notification type
//! - Batch durations and requeued items

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

use crate::MetricsError;

/// Dispatch queue metrics collector
#[derive(Debug)]
pub struct QueueMetrics {
    /// Adds rejected because the queue was at capacity
    full_total: Counter<u64>,

    /// Jobs the handler completed, by notification type
    processed_total: Counter<u64>,

    /// Jobs the handler failed, by notification type and error class
    errors_total: Counter<u64>,

    /// Wall time spent handling one drained batch
    batch_duration_seconds: Histogram<f64>,

    /// Items pushed back into the queue after a failed batch
    requeued_total: Counter<u64>,

    size: Arc<AtomicU64>,
    processed: AtomicU64,
    errors: AtomicU64,
}

impl QueueMetrics {
    /// Create a new queue metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let full_total = meter
            .u64_counter("herald.queue.full.total")
            .with_description("Total number of adds rejected because the queue was full")
            .build();

        let processed_total = meter
            .u64_counter("herald.queue.processed.total")
            .with_description("Total number of jobs processed by type")
            .build();

        let errors_total = meter
            .u64_counter("herald.queue.errors.total")
            .with_description("Total number of job processing errors by type")
            .build();

        let batch_duration_seconds = meter
            .f64_histogram("herald.queue.batch.duration.seconds")
            .with_description("Distribution of batch processing durations")
            .build();

        let requeued_total = meter
            .u64_counter("herald.queue.requeued.total")
            .with_description("Total number of jobs requeued after a failed batch")
            .build();

        let size = Arc::new(AtomicU64::new(0));
        let observed = size.clone();

        meter
            .u64_observable_gauge("herald.queue.size")
            .with_description("Current number of jobs waiting in the dispatch queue")
            .with_callback(move |observer| {
                observer.observe(observed.load(Ordering::Relaxed), &[]);
            })
            .build();

        Ok(Self {
            full_total,
            processed_total,
            errors_total,
            batch_duration_seconds,
            requeued_total,
            size,
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    /// Publish the current queue depth
    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Relaxed);
    }

    /// Current queue depth as last published
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn record_full(&self) {
        self.full_total.add(1, &[]);
    }

    pub fn record_processed(&self, kind: &str) {
        self.processed_total
            .add(1, &[KeyValue::new("type", kind.to_string())]);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: &str, class: &str) {
        let attributes = [
            KeyValue::new("type", kind.to_string()),
            KeyValue::new("class", class.to_string()),
        ];
        self.errors_total.add(1, &attributes);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, duration_secs: f64) {
        self.batch_duration_seconds.record(duration_secs, &[]);
    }

    pub fn record_requeued(&self, count: u64) {
        self.requeued_total.add(count, &[]);
    }

    /// Jobs processed since this collector was created
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Job failures since this collector was created
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("herald.queue")
}
