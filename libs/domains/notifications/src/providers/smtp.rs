//! Sends notification emails through an SMTP relay.

use super::{EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::NotificationRequest;
use async_trait::async_trait;
use core_config::{env_flag, env_parse, env_required, ConfigError, FromEnv};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, error, info};

/// Port for implicit TLS (SMTPS). Other ports upgrade with STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Relay connection and sender settings.
///
/// Credentials are sent only when both `username` and `password` are set;
/// local catchers such as Mailpit need neither, nor TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// `addr@host` or `Name <addr@host>`
    pub from_email: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16, from_email: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            from_email: from_email.into(),
            username: None,
            password: None,
            use_tls: false,
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl FromEnv for SmtpConfig {
    /// SMTP_HOST and FROM_EMAIL are required. SMTP_PORT defaults to 587,
    /// SMTP_USE_TLS to false; SMTP_USER/SMTP_PASSWORD are optional.
    fn from_env() -> Result<Self, ConfigError> {
        let optional = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Ok(Self {
            host: env_required("SMTP_HOST")?,
            port: env_parse("SMTP_PORT", 587)?,
            from_email: env_required("FROM_EMAIL")?,
            username: optional("SMTP_USER"),
            password: optional("SMTP_PASSWORD"),
            use_tls: env_flag("SMTP_USE_TLS", false)?,
        })
    }
}

/// SMTP email provider.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    config: SmtpConfig,
}

impl SmtpProvider {
    /// Create a new SMTP provider. Fails on an unparsable sender address.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let from: Mailbox = config.from_email.parse()?;
        let transport = Self::build_transport(&config)?;
        Ok(Self {
            transport,
            from,
            config,
        })
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    fn build_transport(config: &SmtpConfig) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if !config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        } else if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn build_message(&self, email: &NotificationRequest) -> NotificationResult<Message> {
        let to: Mailbox = email.to_email.parse()?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.body.clone())?;

        Ok(message)
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &NotificationRequest) -> NotificationResult<SentEmail> {
        debug!(
            to = %email.to_email,
            subject = %email.subject,
            host = %self.config.host,
            port = %self.config.port,
            "Sending email via SMTP"
        );

        let message = self.build_message(email)?;

        let response = self.transport.send(message).await.map_err(|e| {
            error!(to = %email.to_email, error = %e, "Failed to send email via SMTP");
            NotificationError::from(e)
        })?;

        let message_id = response.message().next().map(|s| s.to_string());

        info!(to = %email.to_email, message_id = ?message_id, "Email sent via SMTP");

        Ok(SentEmail {
            message_id,
            accepted: response.is_positive(),
        })
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(self.transport.test_connection().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMTP_VARS: [&str; 6] = [
        "SMTP_HOST",
        "SMTP_PORT",
        "SMTP_USER",
        "SMTP_PASSWORD",
        "FROM_EMAIL",
        "SMTP_USE_TLS",
    ];

    #[test]
    fn test_smtp_config_from_env_defaults() {
        temp_env::with_vars_unset(SMTP_VARS, || {
            temp_env::with_vars(
                [("SMTP_HOST", Some("localhost")), ("FROM_EMAIL", Some("newsdesk@example.com"))],
                || {
                    let config = SmtpConfig::from_env().unwrap();
                    assert_eq!(config, SmtpConfig::new("localhost", 587, "newsdesk@example.com"));
                },
            );
        });
    }

    #[test]
    fn test_smtp_config_from_env_full() {
        temp_env::with_vars(
            [
                ("SMTP_HOST", Some("smtp.example.com")),
                ("SMTP_PORT", Some("465")),
                ("SMTP_USER", Some("mailer")),
                ("SMTP_PASSWORD", Some("pw")),
                ("FROM_EMAIL", Some("Newsdesk <newsdesk@example.com>")),
                ("SMTP_USE_TLS", Some("true")),
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config.port, 465);
                assert!(config.use_tls);
                assert_eq!(config.username.as_deref(), Some("mailer"));
                assert_eq!(config.password.as_deref(), Some("pw"));
            },
        );
    }

    #[test]
    fn test_smtp_config_requires_sender() {
        temp_env::with_vars_unset(SMTP_VARS, || {
            temp_env::with_var("SMTP_HOST", Some("localhost"), || {
                let err = SmtpConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("FROM_EMAIL"));
            });
        });
    }

    #[tokio::test]
    async fn test_build_message() {
        let provider = SmtpProvider::new(SmtpConfig::new(
            "localhost",
            1025,
            "Newsdesk <newsdesk@example.com>",
        ))
        .unwrap();

        let message = provider
            .build_message(&NotificationRequest::new("reader@example.com", "Hi", "<p>Hello</p>"))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("To: reader@example.com"));
        assert!(raw.contains("Subject: Hi"));
        assert!(raw.contains("Content-Type: text/html"));
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let result = SmtpProvider::new(SmtpConfig::new("localhost", 1025, "not an address"));
        assert!(matches!(result, Err(NotificationError::ProviderError(_))));
    }

    #[tokio::test]
    async fn test_invalid_recipient_rejected() {
        let provider =
            SmtpProvider::new(SmtpConfig::new("localhost", 1025, "newsdesk@example.com")).unwrap();
        let result = provider.build_message(&NotificationRequest::new("nobody", "Hi", ""));
        assert!(matches!(result, Err(NotificationError::ProviderError(_))));
    }
}
