// Unit tests for the trigger orchestrator

use crewbook_shared::{RunStatus, TriggerEvent};
use serde_json::{Map, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::automations::events::EventContext;
use crate::automations::{BusinessEvent, StageChange};
use crate::services::Mailer;
use crate::tests::fixtures::*;
use crate::tests::helpers::*;

fn mailer_of(mailer: &Arc<RecordingMailer>) -> Option<Arc<dyn Mailer>> {
    Some(mailer.clone() as Arc<dyn Mailer>)
}

#[tokio::test]
async fn no_matching_rules_is_a_quiet_no_op() {
    init_test_logging();
    let user_id = Uuid::new_v4();
    let store = InMemoryStore::with_rules(vec![email_rule(user_id, TriggerEvent::LeadCreated, "s", "b")]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    engine.emit(BusinessEvent::ClientCreated { user_id, client: acme() }).await.unwrap();

    assert!(store.runs().is_empty());
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn estimate_approved_for_acme_sends_one_email() {
    let user_id = Uuid::new_v4();
    let store = InMemoryStore::with_rules(vec![email_rule(
        user_id,
        TriggerEvent::EstimateApproved,
        "Approved: {{client_name}}",
        "Hi {{client_name}}, your estimate is approved.",
    )]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    engine.emit(estimate_approved(user_id, acme())).await.unwrap();

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["a@x.com".to_string()]);
    assert_eq!(sent[0].subject, "Approved: Acme");
    assert!(sent[0].html.contains("Hi Acme, your estimate is approved."));

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].outcome.status(), RunStatus::Success);
    assert_eq!(runs[0].event, TriggerEvent::EstimateApproved);
    assert_eq!(runs[0].user_id, user_id);
    assert_eq!(runs[0].input.get_str("client_name"), Some("Acme"));
    assert_eq!(runs[0].input.get_str("amount"), Some("2450.00"));
}

#[tokio::test]
async fn only_the_owners_active_rules_for_the_event_fire() {
    let user_id = Uuid::new_v4();
    let first = email_rule(user_id, TriggerEvent::ClientCreated, "One", "b");
    let second = email_rule(user_id, TriggerEvent::ClientCreated, "Two", "b");
    let mut inactive = email_rule(user_id, TriggerEvent::ClientCreated, "Off", "b");
    inactive.is_active = false;
    let other_user = email_rule(Uuid::new_v4(), TriggerEvent::ClientCreated, "Theirs", "b");
    let other_event = email_rule(user_id, TriggerEvent::JobCompleted, "Job", "b");

    let store = InMemoryStore::with_rules(vec![
        second.clone(),
        other_user,
        inactive,
        other_event,
        first.clone(),
    ]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    engine.emit(BusinessEvent::ClientCreated { user_id, client: acme() }).await.unwrap();

    let ran: Vec<Uuid> = store.runs().iter().map(|r| r.automation_id).collect();
    assert_eq!(ran, vec![first.id, second.id], "rules run once each, oldest first");

    let subjects: Vec<String> = mailer.sent().into_iter().map(|e| e.subject).collect();
    assert_eq!(subjects, vec!["One", "Two"]);
}

#[tokio::test]
async fn a_failing_rule_does_not_stop_the_next() {
    let user_id = Uuid::new_v4();
    let broken = rule_with_payload(user_id, TriggerEvent::JobCompleted, json!({"body": "no subject"}));
    let working = email_rule(user_id, TriggerEvent::JobCompleted, "Done: {{job_title}}", "Thanks!");
    let store = InMemoryStore::with_rules(vec![broken.clone(), working.clone()]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    engine
        .emit(BusinessEvent::JobCompleted {
            user_id,
            job_id: Uuid::new_v4(),
            job_title: "Lawn install".to_string(),
            client: acme(),
        })
        .await
        .unwrap();

    let runs = store.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].automation_id, broken.id);
    assert_eq!(runs[0].outcome.status(), RunStatus::Error);
    assert_eq!(runs[1].automation_id, working.id);
    assert_eq!(runs[1].outcome.status(), RunStatus::Success);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Done: Lawn install");
}

#[tokio::test]
async fn every_rule_logs_a_configuration_error_without_a_mailer() {
    let user_id = Uuid::new_v4();
    let store = InMemoryStore::with_rules(vec![
        email_rule(user_id, TriggerEvent::LeadCreated, "a", "b"),
        email_rule(user_id, TriggerEvent::LeadCreated, "c", "d"),
    ]);
    let engine = test_engine(store.clone(), None);

    engine.emit(BusinessEvent::LeadCreated { user_id, lead: fake_lead() }).await.unwrap();

    let runs = store.runs();
    assert_eq!(runs.len(), 2);
    for run in runs {
        assert!(!run.outcome.success);
        assert!(run.outcome.error.unwrap().contains("configuration"));
    }
}

#[tokio::test]
async fn lead_stage_events_reach_lead_email() {
    let user_id = Uuid::new_v4();
    let store = InMemoryStore::with_rules(vec![email_rule(
        user_id,
        TriggerEvent::LeadApproved,
        "Welcome aboard {{lead_name}}",
        "Moved from {{old_status}} to {{new_status}}",
    )]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));
    let lead = fake_lead();
    let lead_email = lead.email.clone().unwrap();

    let event = BusinessEvent::lead_stage_changed(
        user_id,
        lead,
        StageChange { old_status: Some("estimate_sent".into()), new_status: "approved".into() },
    )
    .expect("approved has a trigger");
    engine.emit(event).await.unwrap();

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec![lead_email]);
    assert!(sent[0].html.contains("Moved from estimate_sent to approved"));
}

#[tokio::test]
async fn context_without_owner_is_ignored() {
    let user_id = Uuid::new_v4();
    let store = InMemoryStore::with_rules(vec![email_rule(user_id, TriggerEvent::ClientCreated, "s", "b")]);
    let engine = test_engine(store.clone(), mailer_of(&RecordingMailer::new()));

    let mut map = Map::new();
    map.insert("client_email".into(), json!("a@x.com"));
    engine.run(TriggerEvent::ClientCreated, EventContext::from_map(map)).await;

    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn trigger_overrides_a_stale_event_field() {
    let user_id = Uuid::new_v4();
    let store = InMemoryStore::with_rules(vec![email_rule(user_id, TriggerEvent::ClientCreated, "s", "b")]);
    let engine = test_engine(store.clone(), mailer_of(&RecordingMailer::new()));

    let context = EventContext::new(TriggerEvent::LeadCreated, user_id).with("client_email", "a@x.com");
    engine.run(TriggerEvent::ClientCreated, context).await;

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].input.event(), Some(TriggerEvent::ClientCreated));
}

#[tokio::test]
async fn rule_lookup_failure_aborts_quietly() {
    let user_id = Uuid::new_v4();
    let store = InMemoryStore::with_rules(vec![email_rule(user_id, TriggerEvent::ClientCreated, "s", "b")]);
    store.fail_matching();
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    engine.emit(BusinessEvent::ClientCreated { user_id, client: acme() }).await.unwrap();

    assert!(store.runs().is_empty());
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn audit_failures_do_not_block_delivery() {
    let user_id = Uuid::new_v4();
    let store = InMemoryStore::with_rules(vec![
        email_rule(user_id, TriggerEvent::ClientCreated, "one", "b"),
        email_rule(user_id, TriggerEvent::ClientCreated, "two", "b"),
    ]);
    store.fail_inserts();
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    let handle = engine.emit(BusinessEvent::ClientCreated { user_id, client: acme() });

    assert!(handle.await.is_ok(), "engine task must not panic");
    assert_eq!(mailer.sent().len(), 2);
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn delayed_rules_are_queued_not_run() {
    let user_id = Uuid::new_v4();
    let delayed = rule_with_payload(
        user_id,
        TriggerEvent::JobCompleted,
        json!({"subject": "How did we do?", "body": "Review us", "delay_days": 3}),
    );
    let immediate = email_rule(user_id, TriggerEvent::JobCompleted, "Thanks", "b");
    let store = InMemoryStore::with_rules(vec![delayed.clone(), immediate.clone()]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    let before = chrono::Utc::now();
    engine
        .emit(BusinessEvent::JobCompleted {
            user_id,
            job_id: Uuid::new_v4(),
            job_title: "Patio".to_string(),
            client: acme(),
        })
        .await
        .unwrap();

    let scheduled = store.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].run.automation_id, delayed.id);
    assert!(scheduled[0].run.due_at >= before + chrono::Duration::days(3));
    assert_eq!(scheduled[0].run.context["job_title"], json!("Patio"));

    let runs = store.runs();
    assert_eq!(runs.len(), 1, "only the immediate rule has run");
    assert_eq!(runs[0].automation_id, immediate.id);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn failing_to_queue_a_delayed_rule_is_logged_as_an_error_run() {
    let user_id = Uuid::new_v4();
    let delayed = rule_with_payload(
        user_id,
        TriggerEvent::ClientCreated,
        json!({"subject": "s", "body": "b", "delay_days": 1}),
    );
    let store = InMemoryStore::with_rules(vec![delayed.clone()]);
    store.fail_scheduling();
    let engine = test_engine(store.clone(), mailer_of(&RecordingMailer::new()));

    engine.emit(BusinessEvent::ClientCreated { user_id, client: acme() }).await.unwrap();

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].automation_id, delayed.id);
    assert!(runs[0].outcome.error.as_deref().unwrap().contains("schedule"));
}

fn overdue_sweep(user_id: Uuid, invoice_id: Uuid, days: i64) -> EventContext {
    EventContext::new(TriggerEvent::InvoiceOverdue, user_id)
        .with("invoice_id", invoice_id.to_string())
        .with("invoice_number", "INV-9")
        .with("client_email", "a@x.com")
        .with("days_overdue", days)
}

#[tokio::test]
async fn overdue_reminders_fire_once_per_invoice() {
    let user_id = Uuid::new_v4();
    let first_notice = email_rule(user_id, TriggerEvent::InvoiceOverdue, "Reminder {{invoice_number}}", "b");
    let final_notice = rule_with_payload(
        user_id,
        TriggerEvent::InvoiceOverdue,
        json!({"subject": "Final notice {{invoice_number}}", "body": "b", "days_overdue": 14}),
    );
    let store = InMemoryStore::with_rules(vec![first_notice.clone(), final_notice.clone()]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    let invoice_id = Uuid::new_v4();
    for days in 1..=15 {
        engine.run(TriggerEvent::InvoiceOverdue, overdue_sweep(user_id, invoice_id, days)).await;
    }

    let ran: Vec<Uuid> = store.runs().iter().map(|r| r.automation_id).collect();
    assert_eq!(ran, vec![first_notice.id, final_notice.id]);

    let subjects: Vec<String> = mailer.sent().into_iter().map(|e| e.subject).collect();
    assert_eq!(subjects, vec!["Reminder INV-9", "Final notice INV-9"]);

    engine.run(TriggerEvent::InvoiceOverdue, overdue_sweep(user_id, Uuid::new_v4(), 3)).await;
    assert_eq!(mailer.sent().len(), 3, "a different invoice gets its own reminder");
}

#[tokio::test]
async fn missed_sweep_days_still_send_the_reminder() {
    let user_id = Uuid::new_v4();
    let reminder = email_rule(user_id, TriggerEvent::InvoiceOverdue, "Reminder {{invoice_number}}", "b");
    let store = InMemoryStore::with_rules(vec![reminder.clone()]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    // The sweep did not run on day one; the invoice first shows up two days late.
    let invoice_id = Uuid::new_v4();
    engine.run(TriggerEvent::InvoiceOverdue, overdue_sweep(user_id, invoice_id, 2)).await;

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].automation_id, reminder.id);
    assert_eq!(runs[0].outcome.status(), RunStatus::Success);
    assert_eq!(mailer.sent().len(), 1);

    engine.run(TriggerEvent::InvoiceOverdue, overdue_sweep(user_id, invoice_id, 3)).await;
    assert_eq!(store.runs().len(), 1);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn overdue_rules_below_their_threshold_leave_no_run() {
    let user_id = Uuid::new_v4();
    let weekly = rule_with_payload(
        user_id,
        TriggerEvent::InvoiceOverdue,
        json!({"subject": "s", "body": "b", "days_overdue": 7}),
    );
    let store = InMemoryStore::with_rules(vec![weekly]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    engine.run(TriggerEvent::InvoiceOverdue, overdue_sweep(user_id, Uuid::new_v4(), 6)).await;

    assert!(store.runs().is_empty());
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn test_rule_runs_against_sample_values() {
    let user_id = Uuid::new_v4();
    let rule = rule_with_payload(
        user_id,
        TriggerEvent::EstimateSent,
        json!({"subject": "Estimate for {{client_name}}", "body": "Total {{amount}}", "delay_days": 5}),
    );
    let store = InMemoryStore::with_rules(vec![rule.clone()]);
    let mailer = RecordingMailer::new();
    let engine = test_engine(store.clone(), mailer_of(&mailer));

    let mut sample = Map::new();
    sample.insert("client_name".into(), json!("Acme"));
    sample.insert("client_email".into(), json!("a@x.com"));
    sample.insert("amount".into(), json!("99.00"));
    sample.insert("user_id".into(), json!(Uuid::new_v4().to_string()));

    let outcome = engine.test_rule(&rule, sample).await;

    assert!(outcome.success, "{:?}", outcome);
    assert!(store.scheduled().is_empty(), "tests ignore the delay");
    assert_eq!(mailer.sent()[0].subject, "Estimate for Acme");

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].user_id, user_id);
    assert_eq!(runs[0].input.user_id(), Some(user_id), "owner cannot be spoofed");
    assert_eq!(runs[0].input.event(), Some(TriggerEvent::EstimateSent));
}
