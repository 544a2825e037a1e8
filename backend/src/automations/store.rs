// Automation storage - rule lookup, run audit rows and the delayed queue

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crewbook_shared::{ActionOutcome, Automation, TriggerEvent};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::events::EventContext;

/// Trusted identity the engine acts as when it touches a tenant's data.
///
/// Automations fire from unauthenticated paths (public estimate links, cron
/// sweeps), so the engine uses service-level access. The only way to obtain an
/// actor is from an explicit owner id, and every query is scoped by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemActor {
    user_id: Uuid,
}

impl SystemActor {
    pub fn for_user(user_id: Uuid) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One audit row to write.
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub automation_id: Uuid,
    pub event: TriggerEvent,
    pub input: &'a EventContext,
    pub outcome: &'a ActionOutcome,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduledRun {
    pub id: Uuid,
    pub user_id: Uuid,
    pub automation_id: Uuid,
    pub event: String,
    pub context: serde_json::Value,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledRunStatus {
    Pending,
    Running,
    Done,
    Cancelled,
}

impl ScheduledRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

#[async_trait]
pub trait AutomationStore: Send + Sync {
    /// Active rules owned by the actor for `event`, oldest first.
    async fn find_matching_rules(
        &self,
        actor: &SystemActor,
        event: TriggerEvent,
    ) -> Result<Vec<Automation>, StoreError>;

    async fn find_active_rule(
        &self,
        actor: &SystemActor,
        automation_id: Uuid,
    ) -> Result<Option<Automation>, StoreError>;

    async fn insert_run(&self, actor: &SystemActor, run: NewRun<'_>) -> Result<Uuid, StoreError>;

    async fn schedule_run(
        &self,
        actor: &SystemActor,
        automation_id: Uuid,
        event: TriggerEvent,
        context: &EventContext,
        due_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;

    /// Record that `automation_id` has reminded about `invoice_id`. `false` when
    /// it already had, or the invoice is not the actor's; the reminder must not
    /// fire then.
    async fn claim_reminder(
        &self,
        actor: &SystemActor,
        automation_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, StoreError>;

    /// Atomically move up to `limit` rows to running and return them: pending
    /// rows due by `now`, and running rows claimed before `stale_before` whose
    /// dispatcher never finished them.
    async fn claim_due_runs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledRun>, StoreError>;

    /// Record the final status of a claimed row, or hand it back as pending.
    async fn finish_scheduled_run(&self, id: Uuid, status: ScheduledRunStatus) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgAutomationStore {
    pool: PgPool,
}

impl PgAutomationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AutomationStore for PgAutomationStore {
    async fn find_matching_rules(
        &self,
        actor: &SystemActor,
        event: TriggerEvent,
    ) -> Result<Vec<Automation>, StoreError> {
        let rules = sqlx::query_as::<_, Automation>(
            r#"
            SELECT id, user_id, name, trigger_event, is_active, action_type, action_payload,
                   created_at, updated_at
            FROM automations
            WHERE user_id = $1 AND trigger_event = $2 AND is_active = true
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(actor.user_id())
        .bind(event.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rules)
    }

    async fn find_active_rule(
        &self,
        actor: &SystemActor,
        automation_id: Uuid,
    ) -> Result<Option<Automation>, StoreError> {
        let rule = sqlx::query_as::<_, Automation>(
            r#"
            SELECT id, user_id, name, trigger_event, is_active, action_type, action_payload,
                   created_at, updated_at
            FROM automations
            WHERE id = $1 AND user_id = $2 AND is_active = true
            "#,
        )
        .bind(automation_id)
        .bind(actor.user_id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(rule)
    }

    async fn insert_run(&self, actor: &SystemActor, run: NewRun<'_>) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO automation_runs (id, user_id, automation_id, event, input, result, output, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(id)
        .bind(actor.user_id())
        .bind(run.automation_id)
        .bind(run.event.as_str())
        .bind(run.input.to_value())
        .bind(run.outcome.status().as_str())
        .bind(serde_json::to_value(run.outcome)?)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn schedule_run(
        &self,
        actor: &SystemActor,
        automation_id: Uuid,
        event: TriggerEvent,
        context: &EventContext,
        due_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO scheduled_automation_runs
                (id, user_id, automation_id, event, context, due_at, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(id)
        .bind(actor.user_id())
        .bind(automation_id)
        .bind(event.as_str())
        .bind(context.to_value())
        .bind(due_at)
        .bind(ScheduledRunStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_reminder(
        &self,
        actor: &SystemActor,
        automation_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO automation_reminders (automation_id, invoice_id, user_id)
            SELECT $1, i.id, $3 FROM invoices i WHERE i.id = $2 AND i.user_id = $3
            ON CONFLICT (automation_id, invoice_id) DO NOTHING
            "#,
        )
        .bind(automation_id)
        .bind(invoice_id)
        .bind(actor.user_id())
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn claim_due_runs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledRun>, StoreError> {
        let claimed = sqlx::query_as::<_, ScheduledRun>(
            r#"
            UPDATE scheduled_automation_runs
            SET status = $4, claimed_at = $1
            WHERE id IN (
                SELECT id FROM scheduled_automation_runs
                WHERE (status = $5 AND due_at <= $1)
                   OR (status = $4 AND claimed_at < $2)
                ORDER BY due_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, user_id, automation_id, event, context, due_at
            "#,
        )
        .bind(now)
        .bind(stale_before)
        .bind(limit)
        .bind(ScheduledRunStatus::Running.as_str())
        .bind(ScheduledRunStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(claimed)
    }

    async fn finish_scheduled_run(&self, id: Uuid, status: ScheduledRunStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scheduled_automation_runs
            SET status = $2,
                completed_at = CASE WHEN $2 = 'pending' THEN NULL ELSE NOW() END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
