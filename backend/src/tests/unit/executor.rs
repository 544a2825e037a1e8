// Unit tests for the action executor

use async_trait::async_trait;
use crewbook_shared::TriggerEvent;
use mockall::mock;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::automations::events::EventContext;
use crate::automations::{ActionExecutor, ExecutorSettings};
use crate::config::Environment;
use crate::services::{MailError, Mailer, OutboundEmail, SendReceipt};
use crate::tests::fixtures::*;
use crate::tests::helpers::*;

mock! {
    pub ProviderMailer {}

    #[async_trait]
    impl Mailer for ProviderMailer {
        async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, MailError>;
        fn provider(&self) -> &'static str;
    }
}

fn executor(mailer: Arc<dyn Mailer>) -> ActionExecutor {
    ActionExecutor::new(Some(mailer), test_settings())
}

fn client_context(user_id: Uuid) -> EventContext {
    EventContext::new(TriggerEvent::ClientCreated, user_id)
        .with("client_name", "Acme")
        .with("client_email", "a@x.com")
}

#[tokio::test]
async fn unknown_action_type_is_an_error_result() {
    init_test_logging();
    let user_id = Uuid::new_v4();
    let mut rule = email_rule(user_id, TriggerEvent::ClientCreated, "s", "b");
    rule.action_type = "send_sms".to_string();

    let outcome = executor(RecordingMailer::new()).execute(&rule, &client_context(user_id)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Unknown action type: send_sms"));
}

#[tokio::test]
async fn missing_mail_credentials_is_a_configuration_error() {
    let user_id = Uuid::new_v4();
    let rule = email_rule(user_id, TriggerEvent::ClientCreated, "s", "b");
    let executor = ActionExecutor::new(None, test_settings());

    let outcome = executor.execute(&rule, &client_context(user_id)).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().to_lowercase().contains("configuration"));
}

#[tokio::test]
async fn malformed_payload_is_reported() {
    let user_id = Uuid::new_v4();
    let rule = rule_with_payload(user_id, TriggerEvent::ClientCreated, json!({"subject": 42}));
    let mailer = RecordingMailer::new();

    let outcome = executor(mailer.clone()).execute(&rule, &client_context(user_id)).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().starts_with("Invalid send_email payload"));
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn renders_templates_and_wraps_the_body() {
    let user_id = Uuid::new_v4();
    let rule = email_rule(
        user_id,
        TriggerEvent::ClientCreated,
        "Welcome {{client_name}}",
        "Hi {{client_name}},\nthanks for choosing us. {{unknown}}",
    );
    let mailer = RecordingMailer::new();

    let outcome = executor(mailer.clone()).execute(&rule, &client_context(user_id)).await;

    assert!(outcome.success, "{:?}", outcome);
    assert_eq!(outcome.message.as_deref(), Some("Email sent successfully to a@x.com"));
    assert_eq!(outcome.recipient.as_deref(), Some("a@x.com"));
    assert_eq!(outcome.email_id.as_deref(), Some("email_1"));
    assert_eq!(outcome.attempts, Some(1));

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["a@x.com".to_string()]);
    assert_eq!(sent[0].subject, "Welcome Acme");
    assert!(sent[0].html.contains("Hi Acme,<br>thanks for choosing us. {{unknown}}"));
    assert!(sent[0].html.contains("Green Acres"));
}

#[test]
fn recipient_priority_is_client_then_lead_then_email() {
    let executor = ActionExecutor::new(None, test_settings());
    let base = EventContext::new(TriggerEvent::LeadCreated, Uuid::new_v4());

    let all = base
        .clone()
        .with("client_email", "client@x.com")
        .with("lead_email", "lead@x.com")
        .with("email", "other@x.com");
    assert_eq!(executor.resolve_recipient(&all).as_deref(), Some("client@x.com"));

    let blank_client = base
        .clone()
        .with("client_email", "  ")
        .with("lead_email", "lead@x.com")
        .with("email", "other@x.com");
    assert_eq!(executor.resolve_recipient(&blank_client).as_deref(), Some("lead@x.com"));

    let only_email = base.clone().with("lead_email", serde_json::Value::Null).with("email", "other@x.com");
    assert_eq!(executor.resolve_recipient(&only_email).as_deref(), Some("other@x.com"));

    assert_eq!(executor.resolve_recipient(&base), None);
}

#[test]
fn fallback_recipient_only_outside_production() {
    let context = EventContext::new(TriggerEvent::ClientCreated, Uuid::new_v4());

    let development = ExecutorSettings {
        fallback_recipient: Some("qa@example.com".to_string()),
        ..test_settings()
    };
    let production = ExecutorSettings {
        environment: Environment::Production,
        ..development.clone()
    };

    assert_eq!(
        ActionExecutor::new(None, development).resolve_recipient(&context).as_deref(),
        Some("qa@example.com")
    );
    assert_eq!(ActionExecutor::new(None, production).resolve_recipient(&context), None);
}

#[tokio::test]
async fn no_recipient_is_an_error() {
    let user_id = Uuid::new_v4();
    let rule = email_rule(user_id, TriggerEvent::ClientCreated, "s", "b");
    let context = EventContext::new(TriggerEvent::ClientCreated, user_id).with("client_email", serde_json::Value::Null);

    let outcome = executor(RecordingMailer::new()).execute(&rule, &context).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("No recipient"));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let user_id = Uuid::new_v4();
    let rule = email_rule(user_id, TriggerEvent::ClientCreated, "s", "b");
    let mailer = RecordingMailer::scripted(vec![
        Err(MailError::Transient("503 Service Unavailable".into())),
        Err(MailError::Transient("connection reset".into())),
        Ok(SendReceipt { id: Some("re_123".into()) }),
    ]);

    let outcome = executor(mailer.clone()).execute(&rule, &client_context(user_id)).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, Some(3));
    assert_eq!(outcome.email_id.as_deref(), Some("re_123"));
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn retries_stop_at_the_attempt_limit() {
    let user_id = Uuid::new_v4();
    let rule = email_rule(user_id, TriggerEvent::ClientCreated, "s", "b");

    let mut mock = MockProviderMailer::new();
    mock.expect_send()
        .times(3)
        .returning(|_| Err(MailError::Transient("upstream down".into())));

    let outcome = executor(Arc::new(mock)).execute(&rule, &client_context(user_id)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, Some(3));
    assert!(outcome.error.unwrap().contains("upstream down"));
}

#[tokio::test]
async fn permanent_rejections_are_not_retried() {
    let user_id = Uuid::new_v4();
    let rule = email_rule(user_id, TriggerEvent::ClientCreated, "s", "b");

    let mut mock = MockProviderMailer::new();
    mock.expect_send()
        .withf(|email| email.to == vec!["a@x.com".to_string()])
        .times(1)
        .returning(|_| Err(MailError::Rejected("The to address is invalid".into())));

    let outcome = executor(Arc::new(mock)).execute(&rule, &client_context(user_id)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, Some(1));
    assert_eq!(outcome.recipient.as_deref(), Some("a@x.com"));
    assert!(outcome.error.unwrap().contains("The to address is invalid"));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let user_id = Uuid::new_v4();
    let rule = email_rule(user_id, TriggerEvent::ClientCreated, "s", "b");
    let settings = ExecutorSettings {
        action_timeout: Duration::from_millis(50),
        max_attempts: 2,
        ..test_settings()
    };
    let mailer = RecordingMailer::slow(Duration::from_secs(5));

    let outcome = ActionExecutor::new(Some(mailer.clone() as Arc<dyn Mailer>), settings)
        .execute(&rule, &client_context(user_id))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, Some(2));
    assert!(outcome.error.unwrap().contains("timed out"));
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn provider_panic_becomes_an_error_result() {
    let user_id = Uuid::new_v4();
    let rule = email_rule(user_id, TriggerEvent::ClientCreated, "s", "b");

    let outcome = executor(Arc::new(PanickingMailer)).execute(&rule, &client_context(user_id)).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("panicked"));
}
