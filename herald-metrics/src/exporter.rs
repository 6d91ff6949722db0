//! OTLP metrics exporter

use std::time::Duration;

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;

use crate::MetricsError;

/// Build a meter provider that pushes to an OTLP/HTTP endpoint on a fixed interval
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be initialized.
pub fn init_otlp_exporter(
    endpoint: &str,
    interval: Duration,
) -> Result<SdkMeterProvider, MetricsError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| MetricsError::Exporter(e.to_string()))?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    Ok(SdkMeterProvider::builder().with_reader(reader).build())
}
