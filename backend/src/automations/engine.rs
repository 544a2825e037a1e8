// Trigger Orchestrator - matches an event to rules and runs each one

use chrono::{Duration, Utc};
use crewbook_shared::{ActionOutcome, ActionType, Automation, TriggerEvent};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{BusinessEvent, EventContext};
use super::executor::ActionExecutor;
use super::recorder::RunRecorder;
use super::store::{AutomationStore, SystemActor};

/// Days overdue after which an `invoice_overdue` rule without its own
/// threshold starts reminding.
pub const DEFAULT_DAYS_OVERDUE: i64 = 1;

/// What the engine decided to do with one matched rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulePlan {
    Execute,
    Defer { days: i64 },
    Skip,
}

#[derive(Clone)]
pub struct AutomationEngine {
    pub(super) store: Arc<dyn AutomationStore>,
    pub(super) executor: ActionExecutor,
    pub(super) recorder: RunRecorder,
}

impl AutomationEngine {
    pub fn new(store: Arc<dyn AutomationStore>, executor: ActionExecutor) -> Self {
        let recorder = RunRecorder::new(store.clone());
        Self { store, executor, recorder }
    }

    pub fn mail_configured(&self) -> bool {
        self.executor.mail_configured()
    }

    /// Hand an event to the engine without waiting for it. Call only after the
    /// write that produced the event has committed.
    pub fn emit(&self, event: BusinessEvent) -> JoinHandle<()> {
        let engine = self.clone();
        let trigger = event.trigger();
        let context = event.into_context();

        tokio::spawn(async move {
            engine.run(trigger, context).await;
        })
    }

    /// Run every active rule the context's owner has for `trigger`, one after
    /// another. Failures are logged; nothing is returned to the caller.
    pub async fn run(&self, trigger: TriggerEvent, mut context: EventContext) {
        context.insert("event", trigger.as_str());

        let Some(user_id) = context.user_id() else {
            warn!(event = %trigger, "Automation trigger without a user_id, ignoring");
            return;
        };
        let actor = SystemActor::for_user(user_id);

        let rules = match self.store.find_matching_rules(&actor, trigger).await {
            Ok(rules) => rules,
            Err(e) => {
                error!(%user_id, event = %trigger, "Failed to load automation rules: {}", e);
                return;
            }
        };

        let mut eligible = Vec::with_capacity(rules.len());
        for rule in rules {
            match plan(&rule, trigger, &context) {
                RulePlan::Skip => {
                    debug!(automation_id = %rule.id, event = %trigger, "Automation threshold not reached");
                }
                decided => {
                    if self.first_reminder(&actor, &rule, trigger, &context).await {
                        eligible.push((rule, decided));
                    }
                }
            }
        }

        if eligible.is_empty() {
            debug!(%user_id, event = %trigger, "No automations match");
            return;
        }

        info!(%user_id, event = %trigger, rules = eligible.len(), "Running automations");

        for (rule, plan) in &eligible {
            if let RulePlan::Defer { days } = plan {
                self.defer(&actor, rule, trigger, &context, *days).await;
            } else {
                self.execute_and_log(&actor, rule, trigger, &context).await;
            }
        }
    }

    /// Run one rule immediately against a sample context, ignoring any delay,
    /// and log the run like a real trigger would.
    pub async fn test_rule(&self, rule: &Automation, sample: Map<String, Value>) -> ActionOutcome {
        let trigger = match rule.trigger() {
            Ok(trigger) => trigger,
            Err(e) => return ActionOutcome::failure(e.to_string()),
        };

        let mut context = EventContext::from_map(sample);
        context.insert("event", trigger.as_str());
        context.insert("user_id", rule.user_id.to_string());

        let actor = SystemActor::for_user(rule.user_id);
        self.execute_and_log(&actor, rule, trigger, &context).await
    }

    pub(super) async fn execute_and_log(
        &self,
        actor: &SystemActor,
        rule: &Automation,
        trigger: TriggerEvent,
        context: &EventContext,
    ) -> ActionOutcome {
        let outcome = self.executor.execute(rule, context).await;

        if outcome.success {
            info!(automation_id = %rule.id, event = %trigger, "Automation '{}' succeeded", rule.name);
        } else {
            warn!(
                automation_id = %rule.id,
                event = %trigger,
                "Automation '{}' failed: {}",
                rule.name,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        self.recorder.log_run(actor, rule.id, trigger, context, &outcome).await;
        outcome
    }

    /// Overdue reminders fire once per rule and invoice; every other event passes.
    /// A store failure holds the reminder back until the next sweep raises the
    /// invoice again.
    async fn first_reminder(
        &self,
        actor: &SystemActor,
        rule: &Automation,
        trigger: TriggerEvent,
        context: &EventContext,
    ) -> bool {
        if trigger != TriggerEvent::InvoiceOverdue {
            return true;
        }
        let Some(invoice_id) = context.get_str("invoice_id").and_then(|id| id.parse::<Uuid>().ok()) else {
            return true;
        };

        match self.store.claim_reminder(actor, rule.id, invoice_id).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(automation_id = %rule.id, %invoice_id, "Overdue reminder already sent");
                false
            }
            Err(e) => {
                error!(automation_id = %rule.id, %invoice_id, "Failed to record overdue reminder: {}", e);
                false
            }
        }
    }

    async fn defer(
        &self,
        actor: &SystemActor,
        rule: &Automation,
        trigger: TriggerEvent,
        context: &EventContext,
        days: i64,
    ) -> Option<Uuid> {
        let due_at = Utc::now() + Duration::days(days);

        match self.store.schedule_run(actor, rule.id, trigger, context, due_at).await {
            Ok(id) => {
                info!(automation_id = %rule.id, scheduled_id = %id, %due_at, "Automation deferred by {} day(s)", days);
                Some(id)
            }
            Err(e) => {
                error!(automation_id = %rule.id, "Failed to schedule delayed automation: {}", e);
                let outcome = ActionOutcome::failure(format!("Failed to schedule delayed automation: {}", e));
                self.recorder.log_run(actor, rule.id, trigger, context, &outcome).await;
                None
            }
        }
    }
}

/// Decide how a loaded rule handles this occurrence. `invoice_overdue` rules
/// apply once the invoice is at least `days_overdue` late, so a missed sweep
/// day delays the reminder instead of dropping it. Malformed payloads are
/// executed so the executor reports them as a logged failure.
pub fn plan(rule: &Automation, trigger: TriggerEvent, context: &EventContext) -> RulePlan {
    if rule.action() != ActionType::SendEmail {
        return RulePlan::Execute;
    }
    let Ok(payload) = rule.email_payload() else {
        return RulePlan::Execute;
    };

    if trigger == TriggerEvent::InvoiceOverdue {
        let threshold = payload.days_overdue.unwrap_or(DEFAULT_DAYS_OVERDUE);
        if context.get_i64("days_overdue").is_none_or(|days| days < threshold) {
            return RulePlan::Skip;
        }
    }

    match payload.delay_days {
        Some(days) if days > 0 => RulePlan::Defer { days },
        _ => RulePlan::Execute,
    }
}
