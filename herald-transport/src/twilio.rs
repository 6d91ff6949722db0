use async_trait::async_trait;
use herald_common::{outgoing, tracing};
use herald_delivery::{DeliveryError, SmsMessage, SmsTransport};
use reqwest::Client;
use serde::Deserialize;

use crate::{config::TwilioConfig, error::TransportError};

/// Sends SMS through the Twilio Messages API
#[derive(Clone)]
pub struct TwilioTransport {
    config: TwilioConfig,
    client: Client,
}

impl std::fmt::Debug for TwilioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioTransport")
            .field("account_sid", &self.config.account_sid)
            .field("from_number", &self.config.from_number)
            .field("api_base_url", &self.config.api_base_url)
            .finish_non_exhaustive()
    }
}

/// The fields of a created message resource we act on
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: Option<String>,
    status: Option<String>,
    error_code: Option<i64>,
    error_message: Option<String>,
}

impl TwilioTransport {
    /// # Errors
    ///
    /// [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(config: TwilioConfig) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { config, client })
    }

    /// Share an existing client (and its connection pool)
    #[must_use]
    pub const fn with_client(config: TwilioConfig, client: Client) -> Self {
        Self { config, client }
    }

    async fn create_message(&self, message: &SmsMessage) -> Result<(), TransportError> {
        let to = message.to.trim();
        if to.is_empty() {
            return Err(TransportError::InvalidAddress {
                address: message.to.clone(),
                reason: "empty phone number".to_string(),
            });
        }

        let response = self
            .client
            .post(self.config.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", message.body.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // 2xx means the message was created; an unreadable body is not a failure
        let resource = match response.json::<MessageResource>().await {
            Ok(resource) => resource,
            Err(err) => {
                tracing::warn!(to, error = %err, "Unreadable Twilio response for accepted message");
                return Ok(());
            }
        };

        if let Some(code) = resource.error_code {
            return Err(TransportError::Api {
                code,
                message: resource.error_message.unwrap_or_default(),
            });
        }

        outgoing!(
            to,
            sid = resource.sid.as_deref().unwrap_or("-"),
            status = resource.status.as_deref().unwrap_or("-"),
            "SMS accepted by Twilio"
        );

        Ok(())
    }
}

#[async_trait]
impl SmsTransport for TwilioTransport {
    async fn send(&self, message: &SmsMessage) -> Result<(), DeliveryError> {
        Ok(self.create_message(message).await?)
    }
}
