// Overdue Invoice Sweep - raises invoice_overdue once per invoice per day

use chrono::NaiveDate;
use crewbook_shared::TriggerEvent;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use super::JobResult;
use crate::automations::{AutomationEngine, BusinessEvent, ClientRef, InvoiceRef};

pub struct OverdueInvoiceSweep {
    db_pool: PgPool,
    engine: AutomationEngine,
}

#[derive(Debug, Default)]
pub struct SweepResult {
    pub invoices_checked: usize,
    pub events_raised: usize,
}

#[derive(Debug, FromRow)]
struct OverdueInvoice {
    id: Uuid,
    user_id: Uuid,
    invoice_number: String,
    total_amount: Decimal,
    due_date: NaiveDate,
    client_id: Uuid,
    client_name: String,
    client_email: Option<String>,
    client_phone: Option<String>,
}

impl OverdueInvoice {
    fn into_event(self, today: NaiveDate) -> BusinessEvent {
        BusinessEvent::InvoiceOverdue {
            user_id: self.user_id,
            days_overdue: days_overdue(self.due_date, today),
            invoice: InvoiceRef {
                id: self.id,
                number: self.invoice_number,
                amount: self.total_amount,
                due_date: self.due_date,
            },
            client: ClientRef {
                id: self.client_id,
                name: self.client_name,
                email: self.client_email,
                phone: self.client_phone,
            },
        }
    }
}

pub fn days_overdue(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (today - due_date).num_days()
}

impl OverdueInvoiceSweep {
    pub fn new(db_pool: PgPool, engine: AutomationEngine) -> Self {
        Self { db_pool, engine }
    }

    /// Stamp every unpaid invoice past due that hasn't been checked `today` and
    /// run the owner's `invoice_overdue` automations for it. The stamp is taken
    /// in the same statement that selects the invoice, so overlapping sweeps
    /// never raise the event twice for one day.
    pub async fn run(&self, today: NaiveDate) -> JobResult<SweepResult> {
        let invoices = sqlx::query_as::<_, OverdueInvoice>(
            r#"
            UPDATE invoices i
            SET overdue_checked_on = $1
            FROM clients c
            WHERE c.id = i.client_id
              AND i.status NOT IN ('paid', 'void', 'draft')
              AND i.due_date < $1
              AND (i.overdue_checked_on IS NULL OR i.overdue_checked_on < $1)
            RETURNING i.id, i.user_id, i.invoice_number, i.total_amount, i.due_date,
                      c.id AS client_id, c.name AS client_name,
                      c.email AS client_email, c.phone AS client_phone
            "#,
        )
        .bind(today)
        .fetch_all(&self.db_pool)
        .await?;

        let mut result = SweepResult {
            invoices_checked: invoices.len(),
            ..Default::default()
        };

        for invoice in invoices {
            debug!(invoice_id = %invoice.id, "Invoice {} is overdue", invoice.invoice_number);
            let event = invoice.into_event(today);
            self.engine.run(TriggerEvent::InvoiceOverdue, event.into_context()).await;
            result.events_raised += 1;
        }

        info!(
            "Overdue invoice sweep for {}: {} invoices, {} events raised",
            today, result.invoices_checked, result.events_raised
        );

        Ok(result)
    }
}
