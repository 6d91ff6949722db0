use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Metrics already initialised for this process")]
    AlreadyInitialized,

    #[error("Failed to build OTLP exporter: {0}")]
    Exporter(String),

    #[error("Failed to shut down meter provider: {0}")]
    Shutdown(String),
}
