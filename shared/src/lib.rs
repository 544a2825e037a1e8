use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Business occurrences an automation can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    ClientCreated,
    EstimateSent,
    EstimateApproved,
    InvoiceOverdue,
    JobCompleted,
    LeadCreated,
    LeadEstimateSent,
    LeadApproved,
    LeadJobScheduled,
    LeadCompleted,
}

impl TriggerEvent {
    pub const ALL: [TriggerEvent; 10] = [
        Self::ClientCreated,
        Self::EstimateSent,
        Self::EstimateApproved,
        Self::InvoiceOverdue,
        Self::JobCompleted,
        Self::LeadCreated,
        Self::LeadEstimateSent,
        Self::LeadApproved,
        Self::LeadJobScheduled,
        Self::LeadCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientCreated => "client_created",
            Self::EstimateSent => "estimate_sent",
            Self::EstimateApproved => "estimate_approved",
            Self::InvoiceOverdue => "invoice_overdue",
            Self::JobCompleted => "job_completed",
            Self::LeadCreated => "lead_created",
            Self::LeadEstimateSent => "lead_estimate_sent",
            Self::LeadApproved => "lead_approved",
            Self::LeadJobScheduled => "lead_job_scheduled",
            Self::LeadCompleted => "lead_completed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ClientCreated => "New client added",
            Self::EstimateSent => "Estimate sent to client",
            Self::EstimateApproved => "Estimate approved by client",
            Self::InvoiceOverdue => "Invoice overdue",
            Self::JobCompleted => "Job marked complete",
            Self::LeadCreated => "New lead captured",
            Self::LeadEstimateSent => "Lead moved to Estimate Sent",
            Self::LeadApproved => "Lead moved to Approved",
            Self::LeadJobScheduled => "Lead moved to Job Scheduled",
            Self::LeadCompleted => "Lead moved to Completed",
        }
    }

    /// Template variables the event guarantees in its context, beyond `event` and `user_id`.
    pub fn variables(&self) -> &'static [&'static str] {
        match self {
            Self::ClientCreated => &["client_id", "client_name", "client_email", "client_phone"],
            Self::EstimateSent | Self::EstimateApproved => &[
                "estimate_id",
                "estimate_number",
                "client_id",
                "client_name",
                "client_email",
                "amount",
            ],
            Self::InvoiceOverdue => &[
                "invoice_id",
                "invoice_number",
                "client_id",
                "client_name",
                "client_email",
                "amount",
                "due_date",
                "days_overdue",
            ],
            Self::JobCompleted => &["job_id", "job_title", "client_id", "client_name", "client_email"],
            Self::LeadCreated => &["lead_id", "lead_name", "lead_email", "lead_phone", "lead_address"],
            Self::LeadEstimateSent
            | Self::LeadApproved
            | Self::LeadJobScheduled
            | Self::LeadCompleted => &[
                "lead_id",
                "lead_name",
                "lead_email",
                "lead_phone",
                "lead_address",
                "old_status",
                "new_status",
            ],
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTriggerEvent(pub String);

impl fmt::Display for UnknownTriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown trigger event: {}", self.0)
    }
}

impl std::error::Error for UnknownTriggerEvent {}

impl FromStr for TriggerEvent {
    type Err = UnknownTriggerEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| UnknownTriggerEvent(s.to_string()))
    }
}

/// What an automation does when it fires. Stored as free text so rows written
/// by older or newer clients still load; anything unrecognised is rejected at
/// execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionType {
    SendEmail,
    Unsupported(String),
}

impl ActionType {
    pub const SEND_EMAIL: &'static str = "send_email";

    pub fn as_str(&self) -> &str {
        match self {
            Self::SendEmail => Self::SEND_EMAIL,
            Self::Unsupported(other) => other,
        }
    }
}

impl From<&str> for ActionType {
    fn from(value: &str) -> Self {
        match value {
            Self::SEND_EMAIL => Self::SendEmail,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

/// A user-owned automation rule.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub trigger_event: String, // see TriggerEvent
    pub is_active: bool,
    pub action_type: String, // send_email
    pub action_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Automation {
    pub fn action(&self) -> ActionType {
        ActionType::from(self.action_type.as_str())
    }

    pub fn trigger(&self) -> Result<TriggerEvent, UnknownTriggerEvent> {
        self.trigger_event.parse()
    }

    /// The `send_email` payload, if the stored JSON has that shape.
    pub fn email_payload(&self) -> Result<SendEmailPayload, serde_json::Error> {
        serde_json::from_value(self.action_payload.clone())
    }
}

/// Payload of a `send_email` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailPayload {
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_overdue: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Audit row for one execution attempt of one automation.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRun {
    pub id: Uuid,
    pub user_id: Uuid,
    pub automation_id: Uuid,
    pub event: String,
    pub input: serde_json::Value,
    pub result: String, // success, error
    pub output: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Result of executing one automation's action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl ActionOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            recipient: None,
            email_id: None,
            attempts: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            recipient: None,
            email_id: None,
            attempts: None,
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_email_id(mut self, id: Option<String>) -> Self {
        self.email_id = id;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn status(&self) -> RunStatus {
        if self.success {
            RunStatus::Success
        } else {
            RunStatus::Error
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAutomation {
    pub name: String,
    pub trigger_event: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_action_type")]
    pub action_type: String,
    pub action_payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAutomation {
    pub name: Option<String>,
    pub trigger_event: Option<String>,
    pub is_active: Option<bool>,
    pub action_type: Option<String>,
    pub action_payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestAutomationRequest {
    /// Sample values to render the templates with, e.g. `client_name`.
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub event: TriggerEvent,
    pub label: String,
    pub variables: Vec<String>,
}

impl From<TriggerEvent> for EventDescriptor {
    fn from(event: TriggerEvent) -> Self {
        let mut variables = vec!["event".to_string(), "user_id".to_string()];
        variables.extend(event.variables().iter().map(|v| v.to_string()));
        Self {
            event,
            label: event.label().to_string(),
            variables,
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClient {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Estimate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub estimate_number: Option<String>,
    pub title: String,
    pub amount: Decimal,
    pub status: String, // draft, sent, approved, declined
    pub sent_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEstimate {
    pub client_id: Uuid,
    pub estimate_number: Option<String>,
    pub title: String,
    pub amount: Decimal,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub estimate_id: Option<Uuid>,
    pub title: String,
    pub status: String, // scheduled, in_progress, completed
    pub scheduled_for: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub client_id: Uuid,
    pub estimate_id: Option<Uuid>,
    pub title: String,
    pub scheduled_for: Option<NaiveDate>,
}

/// Stages of the lead pipeline, in order.
pub const LEAD_STAGES: [&str; 7] = [
    "new",
    "contacted",
    "estimate_sent",
    "approved",
    "job_scheduled",
    "completed",
    "lost",
];

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub source: Option<String>,
    pub status: String, // see LEAD_STAGES
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLead {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLeadStage {
    pub status: String,
}

fn default_true() -> bool {
    true
}

fn default_action_type() -> String {
    ActionType::SEND_EMAIL.to_string()
}
