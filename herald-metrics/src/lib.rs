//! OpenTelemetry metrics for the herald notification pipeline
//!
//! Instruments are grouped by the component that records them:
//!
//! - **Queue**: depth, rejections, processed/failed jobs, batch durations
//! - **Limiter**: available tokens and waiting callers per service
//! - **Breaker**: circuit state per service, failures and rejections
//! - **Retry**: failed attempts by channel, type and attempt number
//! - **Channel**: sent and failed notifications per channel
//! - **Scheduled**: scheduling API calls and redelivery outcomes
//! - **Preferences**: preference updates and opted-out notifications
//!
//! Metrics are pushed over OTLP/HTTP to an OpenTelemetry Collector.
//!
//! ```rust,no_run
//! use herald_metrics::{init_metrics, MetricsConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MetricsConfig {
//!     enabled: true,
//!     ..MetricsConfig::default()
//! };
//!
//! init_metrics(&config)?;
//!
//! if let Some(metrics) = herald_metrics::get() {
//!     metrics.queue.record_full();
//! }
//! # Ok(())
//! # }
//! ```

mod channel;
mod config;
mod error;
mod exporter;
mod preferences;
mod queue;
mod resilience;
mod scheduled;

use std::time::Duration;

pub use channel::ChannelMetrics;
pub use config::MetricsConfig;
pub use error::MetricsError;
use once_cell::sync::OnceCell;
use opentelemetry_sdk::metrics::SdkMeterProvider;
pub use preferences::PreferenceMetrics;
pub use queue::QueueMetrics;
pub use resilience::{BreakerMetrics, LimiterMetrics, RetryMetrics};
pub use scheduled::ScheduledMetrics;

/// Global metrics instance
static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

static PROVIDER: OnceCell<SdkMeterProvider> = OnceCell::new();

/// Root metrics container
#[derive(Debug)]
pub struct Metrics {
    pub queue: QueueMetrics,
    pub limiter: LimiterMetrics,
    pub breaker: BreakerMetrics,
    pub retry: RetryMetrics,
    pub channel: ChannelMetrics,
    pub scheduled: ScheduledMetrics,
    pub preferences: PreferenceMetrics,
}

impl Metrics {
    /// Build every instrument against the current global meter provider
    ///
    /// # Errors
    ///
    /// Returns an error if any metric instrument cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            queue: QueueMetrics::new()?,
            limiter: LimiterMetrics::new()?,
            breaker: BreakerMetrics::new()?,
            retry: RetryMetrics::new()?,
            channel: ChannelMetrics::new()?,
            scheduled: ScheduledMetrics::new()?,
            preferences: PreferenceMetrics::new()?,
        })
    }
}

/// Initialize the metrics system
///
/// This must be called once at startup before any metrics are recorded.
/// If metrics are disabled in the config, this is a no-op.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called multiple times.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        tracing::info!("Metrics collection is disabled");
        return Ok(());
    }

    if is_enabled() {
        return Err(MetricsError::AlreadyInitialized);
    }

    tracing::info!(
        endpoint = %config.endpoint,
        "Initializing OpenTelemetry metrics with OTLP exporter"
    );

    let provider = exporter::init_otlp_exporter(
        &config.endpoint,
        Duration::from_secs(config.export_interval_secs.max(1)),
    )?;

    opentelemetry::global::set_meter_provider(provider.clone());
    let _ = PROVIDER.set(provider);

    METRICS_INSTANCE
        .set(Metrics::new()?)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    tracing::info!("Metrics collection initialized successfully");

    Ok(())
}

/// Flush pending data points and stop the exporter
///
/// # Errors
///
/// Returns an error if the provider fails to shut down cleanly.
pub fn shutdown() -> Result<(), MetricsError> {
    PROVIDER.get().map_or(Ok(()), |provider| {
        provider
            .shutdown()
            .map_err(|e| MetricsError::Shutdown(e.to_string()))
    })
}

/// The global metrics instance, if `init_metrics()` has installed one
#[must_use]
pub fn get() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}

/// Get a reference to the global metrics instance
///
/// # Panics
///
/// Panics if metrics have not been initialized via `init_metrics()`.
#[must_use]
#[allow(clippy::expect_used)]
pub fn metrics() -> &'static Metrics {
    METRICS_INSTANCE
        .get()
        .expect("Metrics not initialized. Call init_metrics() first.")
}

/// Check if metrics are enabled
#[must_use]
pub fn is_enabled() -> bool {
    METRICS_INSTANCE.get().is_some()
}
