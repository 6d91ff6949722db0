//! Metrics configuration

use serde::Deserialize;

/// Configuration for metrics collection and export
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable or disable metrics collection
    ///
    /// When disabled no provider is installed and every recording call is a no-op.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OTLP endpoint URL for metrics export
    ///
    /// Metrics are pushed to this OpenTelemetry Collector endpoint using OTLP over HTTP,
    /// and the Collector exposes them for scraping.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// How often the periodic reader pushes to the collector
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
}

const fn default_enabled() -> bool {
    false
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".to_string()
}

const fn default_export_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            export_interval_secs: default_export_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: MetricsConfig = ron::from_str("()").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.endpoint, "http://localhost:4318/v1/metrics");
        assert_eq!(config.export_interval_secs, 60);
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let config: MetricsConfig =
            ron::from_str(r#"(enabled: true, endpoint: "http://collector:4318/v1/metrics")"#)
                .unwrap();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "http://collector:4318/v1/metrics");
    }
}
