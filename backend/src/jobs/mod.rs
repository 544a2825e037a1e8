// Background Jobs
//
// Scheduled work that drives automations outside a request: the delayed-run
// dispatcher and the daily overdue invoice sweep. Jobs are scheduled using
// tokio-cron-scheduler.

pub mod overdue_invoices;
pub mod scheduler;

pub use overdue_invoices::OverdueInvoiceSweep;
pub use scheduler::{ExecutionLogs, JobExecutionLog, JobResult, JobScheduler};
