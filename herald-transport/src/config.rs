use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the SMTP connection is secured
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (submission port 587)
    #[default]
    StartTls,
    /// TLS from the first byte (port 465)
    Tls,
    /// No encryption; only for local relays and test servers
    Plain,
}

/// Connection settings for the SMTP relay
///
/// ```ron
/// (
///     host: "smtp.example.com",
///     from_address: "orders@example.com",
///     from_name: Some("Example Store"),
///     username: Some("orders"),
///     password: Some("secret"),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub security: SmtpSecurity,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Envelope and header sender
    pub from_address: String,

    #[serde(default)]
    pub from_name: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_smtp_port() -> u16 {
    587
}

const fn default_timeout_secs() -> u64 {
    30
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_smtp_port(),
            security: SmtpSecurity::default(),
            username: None,
            password: None,
            from_address: from_address.into(),
            from_name: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_security(mut self, security: SmtpSecurity) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Twilio account used for SMS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,

    /// Number messages are sent from, in E.164 form
    pub from_number: String,

    /// Override for tests against a local server
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "https://api.twilio.com".to_string()
}

impl TwilioConfig {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            api_base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Endpoint that creates a message for this account
    #[must_use]
    pub fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base_url.trim_end_matches('/'),
            self.account_sid
        )
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_smtp_defaults_from_ron() {
        let config: SmtpConfig =
            ron::from_str(r#"(host: "smtp.example.com", from_address: "orders@example.com")"#)
                .unwrap();

        assert_eq!(
            config,
            SmtpConfig::new("smtp.example.com", "orders@example.com")
        );
        assert_eq!(config.port, 587);
        assert_eq!(config.security, SmtpSecurity::StartTls);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_smtp_builder() {
        let config = SmtpConfig::new("localhost", "orders@example.com")
            .with_port(2525)
            .with_security(SmtpSecurity::Plain)
            .with_credentials("user", "pass");

        assert_eq!(config.port, 2525);
        assert_eq!(config.security, SmtpSecurity::Plain);
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_twilio_messages_url() {
        let config = TwilioConfig::new("AC123", "token", "+15550000");
        assert_eq!(
            config.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );

        let local = config.with_api_base_url("http://127.0.0.1:8080/");
        assert_eq!(
            local.messages_url(),
            "http://127.0.0.1:8080/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn test_twilio_from_ron() {
        let config: TwilioConfig = ron::from_str(
            r#"(account_sid: "AC123", auth_token: "token", from_number: "+15550000", timeout_secs: 5)"#,
        )
        .unwrap();

        assert_eq!(config.api_base_url, "https://api.twilio.com");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }
}
