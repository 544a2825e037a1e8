use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{PoolConfig, authentication::Credentials},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::resend::ResendMailer;
use crate::config::{MailConfig, MailProvider, SmtpConfig};

/// A rendered message ready for delivery. The sender address belongs to the mailer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReceipt {
    pub id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid email address '{0}'")]
    InvalidAddress(String),
    #[error("Failed to build email: {0}")]
    Build(String),
    #[error("Email provider rejected the message: {0}")]
    Rejected(String),
    #[error("Email provider unavailable: {0}")]
    Transient(String),
    #[error("Email delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl MailError {
    /// Whether another attempt could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, MailError>;

    fn provider(&self) -> &'static str;
}

/// Build the configured mailer, or `None` when no credential is present.
pub fn build_mailer(config: &MailConfig) -> Result<Option<Arc<dyn Mailer>>, MailError> {
    let from = format!("{} <{}>", config.from_name, config.from_email);

    let mailer: Arc<dyn Mailer> = match &config.provider {
        None => return Ok(None),
        Some(MailProvider::Resend { api_key, api_url }) => {
            Arc::new(ResendMailer::new(api_url, api_key, &from)?)
        }
        Some(MailProvider::Smtp(smtp)) => Arc::new(SmtpMailer::new(smtp, &from)?),
    };

    info!("Outbound email enabled via {}", mailer.provider());
    Ok(Some(mailer))
}

#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(smtp_config: &SmtpConfig, from: &str) -> Result<Self, MailError> {
        let creds = Credentials::new(smtp_config.username.clone(), smtp_config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_config.host)
            .map_err(|e| MailError::Build(e.to_string()))?
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        let from = from
            .parse::<Mailbox>()
            .map_err(|_| MailError::InvalidAddress(from.to_string()))?;

        Ok(SmtpMailer { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, MailError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML);

        for to in &email.to {
            let mailbox = to
                .parse::<Mailbox>()
                .map_err(|_| MailError::InvalidAddress(to.clone()))?;
            builder = builder.to(mailbox);
        }

        let message = builder
            .body(email.html.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(response) => Ok(SendReceipt {
                id: response.message().next().map(|line| line.to_string()),
            }),
            Err(e) => {
                error!("SMTP delivery to {:?} failed: {}", email.to, e);
                if e.is_permanent() {
                    Err(MailError::Rejected(e.to_string()))
                } else {
                    Err(MailError::Transient(e.to_string()))
                }
            }
        }
    }

    fn provider(&self) -> &'static str {
        "smtp"
    }
}

/// Standard HTML envelope around an automation's rendered body.
pub fn wrap_html(body: &str, brand: &str) -> String {
    let content = body.replace("\r\n", "\n").replace('\n', "<br>");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <style>
        body {{ font-family: Arial, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5; }}
        .container {{ max-width: 600px; margin: 0 auto; background: white; border-radius: 8px; overflow: hidden; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }}
        .header {{ background: #15803d; color: white; padding: 20px; text-align: center; }}
        .content {{ padding: 30px; line-height: 1.6; color: #1f2937; }}
        .footer {{ background: #f8fafc; padding: 20px; text-align: center; color: #666; font-size: 12px; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>{brand}</h1>
        </div>
        <div class="content">
            {content}
        </div>
        <div class="footer">
            <p>Sent by {brand}. This is an automated message.</p>
        </div>
    </div>
</body>
</html>
"#
    )
}
