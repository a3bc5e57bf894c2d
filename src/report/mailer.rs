use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ReportMailer: Send + Sync {
    async fn send_report(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        attachment: Option<MailAttachment>,
    ) -> ApiResult<()>;
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub use_tls: bool,
}

impl SmtpConfig {
    // SMTP stays optional, the server runs without it and mail calls fail soft.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;
        let from_address = std::env::var("SMTP_FROM_ADDRESS").ok()?;
        let port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("SMTP_PASSWORD").unwrap_or_default();
        let use_tls = std::env::var("SMTP_USE_TLS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        Some(SmtpConfig {
            host,
            port,
            username,
            password,
            from_address,
            use_tls,
        })
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> ApiResult<Self> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| ApiError::Internal(format!("smtp relay setup failed: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        let from = config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| ApiError::Internal(format!("invalid SMTP_FROM_ADDRESS: {}", e)))?;
        Ok(SmtpMailer {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl ReportMailer for SmtpMailer {
    async fn send_report(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        attachment: Option<MailAttachment>,
    ) -> ApiResult<()> {
        let recipient = to
            .parse::<Mailbox>()
            .map_err(|e| ApiError::InvalidInput(format!("Adresse email invalide: {}", e)))?;

        let body_part = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string());

        let builder = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject);

        let message = match attachment {
            Some(file) => {
                let content_type = ContentType::parse(&file.content_type).map_err(|e| {
                    ApiError::Internal(format!("invalid attachment content type: {}", e))
                })?;
                let part = Attachment::new(file.filename).body(file.bytes, content_type);
                builder
                    .multipart(MultiPart::mixed().singlepart(body_part).singlepart(part))
                    .map_err(|e| ApiError::Internal(format!("mail assembly failed: {}", e)))?
            }
            None => builder
                .singlepart(body_part)
                .map_err(|e| ApiError::Internal(format!("mail assembly failed: {}", e)))?,
        };

        self.transport
            .send(message)
            .await
            .map_err(|e| ApiError::Upstream(format!("smtp delivery failed: {}", e)))?;
        Ok(())
    }
}

// Stands in when SMTP is not configured.
pub struct DisabledMailer;

#[async_trait]
impl ReportMailer for DisabledMailer {
    async fn send_report(
        &self,
        _to: &str,
        _subject: &str,
        _html_body: &str,
        _attachment: Option<MailAttachment>,
    ) -> ApiResult<()> {
        Err(ApiError::Upstream(
            "Le serveur SMTP n'est pas configuré.".to_string(),
        ))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockMailer {
        pub sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReportMailer for MockMailer {
        async fn send_report(
            &self,
            to: &str,
            _subject: &str,
            _html_body: &str,
            _attachment: Option<MailAttachment>,
        ) -> ApiResult<()> {
            self.sent
                .lock()
                .map_err(|_| ApiError::Internal("mock mailer poisoned".to_string()))?
                .push(to.to_string());
            Ok(())
        }
    }
}
