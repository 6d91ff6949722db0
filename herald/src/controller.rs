use std::sync::{Arc, LazyLock};

use herald_common::{Signal, internal, logging, tracing};
use herald_delivery::{EmailTransport, Pipeline, PipelineConfig, SmsTransport, Transports};
use herald_metrics::MetricsConfig;
use herald_store::StoreConfig;
use herald_tracing::traced;
use herald_transport::{SmtpConfig, SmtpTransport, TwilioConfig, TwilioTransport};
use serde::Deserialize;
use tokio::sync::broadcast;

/// Root of the RON configuration
///
/// ```ron
/// Herald (
///     pipeline: (
///         queue: (max_size: 10000, batch_size: 100),
///         retry: (max_attempts: 3),
///     ),
///     store: File(path: "/var/lib/herald/scheduled"),
///     smtp: Some((host: "smtp.example.com", from_address: "orders@example.com")),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Herald {
    #[serde(default)]
    pipeline: PipelineConfig,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    smtp: Option<SmtpConfig>,
    #[serde(alias = "sms", default)]
    twilio: Option<TwilioConfig>,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Herald {
    /// Build the transports that have a configuration section
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured transport cannot be built.
    pub fn transports(&self) -> anyhow::Result<Transports> {
        let email = self
            .smtp
            .as_ref()
            .map(SmtpTransport::new)
            .transpose()?
            .map(|transport| Arc::new(transport) as Arc<dyn EmailTransport>);

        let sms = self
            .twilio
            .clone()
            .map(TwilioTransport::new)
            .transpose()?
            .map(|transport| Arc::new(transport) as Arc<dyn SmsTransport>);

        if email.is_none() && sms.is_none() {
            tracing::warn!("Neither smtp nor twilio is configured, every notification will be dropped");
        }

        Ok(Transports { email, sms })
    }

    /// Open the stores and assemble the pipeline around `transports`
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline configuration is invalid or a store
    /// cannot be opened.
    pub async fn pipeline(self, transports: Transports) -> anyhow::Result<Pipeline> {
        self.pipeline.validate()?;

        let preferences = self.store.preference_store().await?;
        let store = self.store.into_store().await?;
        Ok(Pipeline::with_preferences(
            self.pipeline,
            store,
            preferences,
            transports,
        ))
    }

    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if metrics, a transport or the store
    /// fail to initialise.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        herald_metrics::init_metrics(&self.metrics)?;

        let transports = self.transports()?;
        let pipeline = self.pipeline(transports).await?;

        internal!("Controller running");

        let ret = tokio::select! {
            r = pipeline.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        if let Err(err) = herald_metrics::shutdown() {
            tracing::warn!(error = %err, "Failed to flush metrics");
        }

        ret
    }
}
