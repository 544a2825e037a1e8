// Business events - typed occurrences and the flat context automations see

use chrono::NaiveDate;
use crewbook_shared::TriggerEvent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Flat key/value view of an event occurrence. Always carries `event` and `user_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventContext(Map<String, Value>);

impl EventContext {
    pub fn new(event: TriggerEvent, user_id: Uuid) -> Self {
        let mut map = Map::new();
        map.insert("event".to_string(), Value::String(event.as_str().to_string()));
        map.insert("user_id".to_string(), Value::String(user_id.to_string()));
        Self(map)
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for `key`, ignoring nulls and blank strings.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn event(&self) -> Option<TriggerEvent> {
        self.get_str("event")?.parse().ok()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.get_str("user_id")?.parse().ok()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl TryFrom<Value> for EventContext {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientRef {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimateRef {
    pub id: Uuid,
    pub number: Option<String>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRef {
    pub id: Uuid,
    pub number: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeadRef {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageChange {
    pub old_status: Option<String>,
    pub new_status: String,
}

/// A committed business occurrence, one variant per trigger event.
#[derive(Debug, Clone, PartialEq)]
pub enum BusinessEvent {
    ClientCreated { user_id: Uuid, client: ClientRef },
    EstimateSent { user_id: Uuid, estimate: EstimateRef, client: ClientRef },
    EstimateApproved { user_id: Uuid, estimate: EstimateRef, client: ClientRef },
    InvoiceOverdue { user_id: Uuid, invoice: InvoiceRef, client: ClientRef, days_overdue: i64 },
    JobCompleted { user_id: Uuid, job_id: Uuid, job_title: String, client: ClientRef },
    LeadCreated { user_id: Uuid, lead: LeadRef },
    LeadEstimateSent { user_id: Uuid, lead: LeadRef, change: StageChange },
    LeadApproved { user_id: Uuid, lead: LeadRef, change: StageChange },
    LeadJobScheduled { user_id: Uuid, lead: LeadRef, change: StageChange },
    LeadCompleted { user_id: Uuid, lead: LeadRef, change: StageChange },
}

impl BusinessEvent {
    /// Event for a lead moving between pipeline stages, if that stage has a trigger.
    pub fn lead_stage_changed(user_id: Uuid, lead: LeadRef, change: StageChange) -> Option<Self> {
        if change.old_status.as_deref() == Some(change.new_status.as_str()) {
            return None;
        }

        let event = match change.new_status.as_str() {
            "estimate_sent" => Self::LeadEstimateSent { user_id, lead, change },
            "approved" => Self::LeadApproved { user_id, lead, change },
            "job_scheduled" => Self::LeadJobScheduled { user_id, lead, change },
            "completed" => Self::LeadCompleted { user_id, lead, change },
            _ => return None,
        };
        Some(event)
    }

    pub fn trigger(&self) -> TriggerEvent {
        match self {
            Self::ClientCreated { .. } => TriggerEvent::ClientCreated,
            Self::EstimateSent { .. } => TriggerEvent::EstimateSent,
            Self::EstimateApproved { .. } => TriggerEvent::EstimateApproved,
            Self::InvoiceOverdue { .. } => TriggerEvent::InvoiceOverdue,
            Self::JobCompleted { .. } => TriggerEvent::JobCompleted,
            Self::LeadCreated { .. } => TriggerEvent::LeadCreated,
            Self::LeadEstimateSent { .. } => TriggerEvent::LeadEstimateSent,
            Self::LeadApproved { .. } => TriggerEvent::LeadApproved,
            Self::LeadJobScheduled { .. } => TriggerEvent::LeadJobScheduled,
            Self::LeadCompleted { .. } => TriggerEvent::LeadCompleted,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            Self::ClientCreated { user_id, .. }
            | Self::EstimateSent { user_id, .. }
            | Self::EstimateApproved { user_id, .. }
            | Self::InvoiceOverdue { user_id, .. }
            | Self::JobCompleted { user_id, .. }
            | Self::LeadCreated { user_id, .. }
            | Self::LeadEstimateSent { user_id, .. }
            | Self::LeadApproved { user_id, .. }
            | Self::LeadJobScheduled { user_id, .. }
            | Self::LeadCompleted { user_id, .. } => *user_id,
        }
    }

    pub fn into_context(self) -> EventContext {
        let mut ctx = EventContext::new(self.trigger(), self.user_id());

        match self {
            Self::ClientCreated { client, .. } => put_client(&mut ctx, client),
            Self::EstimateSent { estimate, client, .. }
            | Self::EstimateApproved { estimate, client, .. } => {
                ctx.insert("estimate_id", estimate.id.to_string());
                ctx.insert("estimate_number", estimate.number);
                ctx.insert("amount", money(estimate.amount));
                put_client(&mut ctx, client);
            }
            Self::InvoiceOverdue { invoice, client, days_overdue, .. } => {
                ctx.insert("invoice_id", invoice.id.to_string());
                ctx.insert("invoice_number", invoice.number);
                ctx.insert("amount", money(invoice.amount));
                ctx.insert("due_date", invoice.due_date.to_string());
                ctx.insert("days_overdue", days_overdue);
                put_client(&mut ctx, client);
            }
            Self::JobCompleted { job_id, job_title, client, .. } => {
                ctx.insert("job_id", job_id.to_string());
                ctx.insert("job_title", job_title);
                put_client(&mut ctx, client);
            }
            Self::LeadCreated { lead, .. } => put_lead(&mut ctx, lead),
            Self::LeadEstimateSent { lead, change, .. }
            | Self::LeadApproved { lead, change, .. }
            | Self::LeadJobScheduled { lead, change, .. }
            | Self::LeadCompleted { lead, change, .. } => {
                put_lead(&mut ctx, lead);
                ctx.insert("old_status", change.old_status);
                ctx.insert("new_status", change.new_status);
            }
        }

        ctx
    }
}

fn money(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

fn put_client(ctx: &mut EventContext, client: ClientRef) {
    ctx.insert("client_id", client.id.to_string());
    ctx.insert("client_name", client.name);
    ctx.insert("client_email", client.email);
    ctx.insert("client_phone", client.phone);
}

fn put_lead(ctx: &mut EventContext, lead: LeadRef) {
    ctx.insert("lead_id", lead.id.to_string());
    ctx.insert("lead_name", lead.name);
    ctx.insert("lead_email", lead.email);
    ctx.insert("lead_phone", lead.phone);
    ctx.insert("lead_address", lead.address);
}
