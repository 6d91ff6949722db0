use async_trait::async_trait;
use herald_common::{outgoing, tracing};
use herald_delivery::{DeliveryError, EmailBody, EmailMessage, EmailTransport};
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::{
    config::{SmtpConfig, SmtpSecurity},
    error::TransportError,
};

/// Relays composed email through an SMTP server
pub struct SmtpTransport {
    from: Mailbox,
    relay: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// Build the relay described by `config`
    ///
    /// Must be called from within a tokio runtime: the connection pool
    /// spawns its housekeeping task on construction.
    ///
    /// # Errors
    ///
    /// [`TransportError::Configuration`] if the sender address is malformed
    /// or the TLS parameters for `host` cannot be built.
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let from = mailbox(config.from_name.as_deref(), &config.from_address)
            .map_err(|err| TransportError::Configuration(format!("sender: {err}")))?;

        let builder = match config.security {
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(
                    |err| TransportError::Configuration(format!("STARTTLS relay: {err}")),
                )?
            }
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|err| TransportError::Configuration(format!("TLS relay: {err}")))?,
            SmtpSecurity::Plain => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
        };

        let builder = builder
            .port(config.port)
            .timeout(Some(config.timeout()));

        let builder = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        tracing::debug!(
            host = %config.host,
            port = config.port,
            security = ?config.security,
            "SMTP relay configured"
        );

        Ok(Self {
            from,
            relay: builder.build(),
        })
    }

    /// Open a connection and issue NOOP
    ///
    /// # Errors
    ///
    /// [`TransportError::Smtp`] if the server cannot be reached.
    pub async fn test_connection(&self) -> Result<bool, TransportError> {
        Ok(self.relay.test_connection().await?)
    }
}

fn mailbox(name: Option<&str>, address: &str) -> Result<Mailbox, TransportError> {
    let parsed: Address = address
        .trim()
        .parse()
        .map_err(|err: lettre::address::AddressError| TransportError::InvalidAddress {
            address: address.to_string(),
            reason: err.to_string(),
        })?;

    Ok(Mailbox::new(name.map(str::to_string), parsed))
}

fn build_message(from: &Mailbox, message: &EmailMessage) -> Result<Message, TransportError> {
    let to = mailbox(message.to_name.as_deref(), &message.to)?;

    let builder = Message::builder()
        .from(from.clone())
        .to(to)
        .subject(message.subject.as_str());

    let built = match &message.body {
        EmailBody::Html(html) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
        EmailBody::Text(text) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
    };

    built.map_err(|err| TransportError::Message(err.to_string()))
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        let email = build_message(&self.from, message)?;

        let response = self
            .relay
            .send(email)
            .await
            .map_err(TransportError::from)?;

        outgoing!(
            to = %message.to,
            subject = %message.subject,
            code = %response.code(),
            "Email accepted by relay"
        );

        Ok(())
    }
}
