// Action Executor - performs an automation's action against an event context

use crewbook_shared::{ActionOutcome, ActionType, Automation};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::events::EventContext;
use super::template::render;
use crate::config::{AutomationConfig, Environment};
use crate::services::{MailError, Mailer, OutboundEmail, SendReceipt, wrap_html};

/// Context keys consulted for the recipient, in priority order.
pub const RECIPIENT_KEYS: [&str; 3] = ["client_email", "lead_email", "email"];

pub const MAIL_NOT_CONFIGURED: &str =
    "Email configuration missing: set RESEND_API_KEY or SMTP_HOST/SMTP_USERNAME/SMTP_PASSWORD";

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub environment: Environment,
    /// Stand-in recipient for contexts without one. Ignored in production.
    pub fallback_recipient: Option<String>,
    pub brand_name: String,
    pub action_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl ExecutorSettings {
    pub fn new(environment: Environment, brand_name: &str, automation: &AutomationConfig) -> Self {
        Self {
            environment,
            fallback_recipient: automation.test_recipient.clone(),
            brand_name: brand_name.to_string(),
            action_timeout: automation.action_timeout(),
            max_attempts: automation.max_attempts.max(1),
            retry_backoff: automation.retry_backoff(),
        }
    }

    /// Longest a single action can take: every attempt timing out, plus the
    /// backoff slept between them.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut total = self.action_timeout.saturating_mul(attempts);
        let mut backoff = self.retry_backoff;
        for _ in 1..attempts {
            total = total.saturating_add(backoff);
            backoff = backoff.saturating_mul(2);
        }
        total
    }
}

#[derive(Clone)]
pub struct ActionExecutor {
    mailer: Option<Arc<dyn Mailer>>,
    settings: ExecutorSettings,
}

impl ActionExecutor {
    pub fn new(mailer: Option<Arc<dyn Mailer>>, settings: ExecutorSettings) -> Self {
        Self { mailer, settings }
    }

    pub fn mail_configured(&self) -> bool {
        self.mailer.is_some()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute the automation's action. Every failure, including a panic inside
    /// the mail provider, comes back as an unsuccessful outcome.
    pub async fn execute(&self, automation: &Automation, context: &EventContext) -> ActionOutcome {
        match AssertUnwindSafe(self.dispatch(automation, context)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(automation_id = %automation.id, "Automation action panicked");
                ActionOutcome::failure("Automation action panicked")
            }
        }
    }

    async fn dispatch(&self, automation: &Automation, context: &EventContext) -> ActionOutcome {
        match automation.action() {
            ActionType::SendEmail => self.send_email(automation, context).await,
            ActionType::Unsupported(other) => {
                ActionOutcome::failure(format!("Unknown action type: {}", other))
            }
        }
    }

    async fn send_email(&self, automation: &Automation, context: &EventContext) -> ActionOutcome {
        let Some(mailer) = &self.mailer else {
            warn!(automation_id = %automation.id, "send_email skipped: {}", MAIL_NOT_CONFIGURED);
            return ActionOutcome::failure(MAIL_NOT_CONFIGURED);
        };

        let payload = match automation.email_payload() {
            Ok(payload) => payload,
            Err(e) => return ActionOutcome::failure(format!("Invalid send_email payload: {}", e)),
        };

        let subject = render(&payload.subject, context);
        let body = render(&payload.body, context);

        let Some(recipient) = self.resolve_recipient(context) else {
            return ActionOutcome::failure("No recipient email address in event context");
        };

        let email = OutboundEmail {
            to: vec![recipient.clone()],
            subject,
            html: wrap_html(&body, &self.settings.brand_name),
        };

        match self.deliver(mailer.as_ref(), &email).await {
            (Ok(receipt), attempts) => {
                info!(automation_id = %automation.id, attempts, "Automation email sent to {}", recipient);
                ActionOutcome::success(format!("Email sent successfully to {}", recipient))
                    .with_recipient(recipient)
                    .with_email_id(receipt.id)
                    .with_attempts(attempts)
            }
            (Err(e), attempts) => {
                warn!(automation_id = %automation.id, attempts, "Automation email to {} failed: {}", recipient, e);
                ActionOutcome::failure(e.to_string())
                    .with_recipient(recipient)
                    .with_attempts(attempts)
            }
        }
    }

    /// First non-blank of `client_email`, `lead_email`, `email`; outside
    /// production, the configured test address when none is present.
    pub fn resolve_recipient(&self, context: &EventContext) -> Option<String> {
        if let Some(address) = RECIPIENT_KEYS.iter().find_map(|key| context.get_str(key)) {
            return Some(address.to_string());
        }

        if self.settings.environment.is_production() {
            return None;
        }

        let fallback = self.settings.fallback_recipient.clone()?;
        warn!(
            event = ?context.get_str("event"),
            "No recipient in event context, rerouting automation email to test address {}",
            fallback
        );
        Some(fallback)
    }

    /// Send with a per-attempt timeout, retrying transient failures with
    /// exponential backoff. Returns the final result and the attempts made.
    async fn deliver(&self, mailer: &dyn Mailer, email: &OutboundEmail) -> (Result<SendReceipt, MailError>, u32) {
        let mut backoff = self.settings.retry_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(self.settings.action_timeout, mailer.send(email)).await {
                Ok(result) => result,
                Err(_) => Err(MailError::Timeout(self.settings.action_timeout)),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    warn!(
                        "Email delivery attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, self.settings.max_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                other => return (other, attempt),
            }
        }
    }
}
