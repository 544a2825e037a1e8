// HTTP transactional email provider (Resend-compatible API).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::email::{MailError, Mailer, OutboundEmail, SendReceipt};

#[derive(Clone)]
pub struct ResendMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: Option<String>,
    name: Option<String>,
}

impl ResendMailer {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MailError::Build(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/emails", api_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, MailError> {
        let request = SendRequest {
            from: &self.from,
            to: &email.to,
            subject: &email.subject,
            html: &email.html,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| MailError::Transient(e.to_string()))?;

        let status = response.status();
        // A 2xx means the message was accepted; retrying would send it twice.
        if status.is_success() {
            return match response.json::<SendResponse>().await {
                Ok(body) => {
                    debug!("Email accepted by provider, id={:?}", body.id);
                    Ok(SendReceipt { id: body.id })
                }
                Err(e) => {
                    warn!("Email accepted by provider ({}) but the response was unreadable: {}", status, e);
                    Ok(SendReceipt { id: None })
                }
            };
        }

        let detail = match response.json::<ErrorResponse>().await {
            Ok(ErrorResponse { message: Some(message), .. }) => message,
            Ok(ErrorResponse { name: Some(name), .. }) => name,
            _ => status.to_string(),
        };
        warn!("Email provider returned {}: {}", status, detail);

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(MailError::Transient(detail))
        } else {
            Err(MailError::Rejected(detail))
        }
    }

    fn provider(&self) -> &'static str {
        "resend"
    }
}
