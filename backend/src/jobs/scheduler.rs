// Job Scheduler - background jobs that feed the automation engine

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};

use super::OverdueInvoiceSweep;
use crate::automations::{AutomationEngine, StoreError};
use crate::config::AutomationConfig;

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Automation store error: {0}")]
    StoreError(#[from] StoreError),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize)]
pub struct JobExecutionLog {
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: JobStatus,
    pub items_processed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Shared handle to the most recent job executions, newest last.
pub type ExecutionLogs = Arc<RwLock<Vec<JobExecutionLog>>>;

pub struct JobScheduler {
    scheduler: TokioScheduler,
    db_pool: PgPool,
    engine: AutomationEngine,
    config: AutomationConfig,
    execution_logs: ExecutionLogs,
}

impl JobScheduler {
    pub async fn new(db_pool: PgPool, engine: AutomationEngine, config: AutomationConfig) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            db_pool,
            engine,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_delayed_dispatch().await?;
        self.schedule_overdue_sweep().await?;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    pub fn execution_logs(&self) -> ExecutionLogs {
        self.execution_logs.clone()
    }

    async fn schedule_delayed_dispatch(&self) -> JobResult<()> {
        let interval = self.config.dispatch_interval();
        let batch_size = self.config.dispatch_batch_size;
        let engine = self.engine.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let engine = engine.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();

                match engine.dispatch_due(started_at, batch_size).await {
                    Ok(summary) => {
                        // Idle ticks are not worth a log entry.
                        if summary.claimed > 0 {
                            record(&logs, "Delayed Automations", started_at, Ok(summary.executed)).await;
                        }
                    }
                    Err(e) => {
                        error!("Delayed automation dispatch failed: {}", e);
                        record(&logs, "Delayed Automations", started_at, Err(e.to_string())).await;
                    }
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled delayed automation dispatch every {:?}", interval);

        Ok(())
    }

    async fn schedule_overdue_sweep(&self) -> JobResult<()> {
        let cron_expr = self.config.overdue_sweep_cron.clone();
        let db_pool = self.db_pool.clone();
        let engine = self.engine.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let sweep = OverdueInvoiceSweep::new(db_pool.clone(), engine.clone());
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();
                info!("Running overdue invoice sweep");

                match sweep.run(started_at.date_naive()).await {
                    Ok(result) => {
                        record(&logs, "Overdue Invoices", started_at, Ok(result.invoices_checked)).await;
                    }
                    Err(e) => {
                        error!("Overdue invoice sweep failed: {}", e);
                        record(&logs, "Overdue Invoices", started_at, Err(e.to_string())).await;
                    }
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled overdue invoice sweep with cron '{}'", cron_expr);

        Ok(())
    }
}

async fn record(logs: &ExecutionLogs, job_name: &str, started_at: DateTime<Utc>, result: Result<usize, String>) {
    let (status, items_processed, error) = match result {
        Ok(items) => (JobStatus::Completed, items, None),
        Err(e) => (JobStatus::Failed, 0, Some(e)),
    };

    let mut logs = logs.write().await;
    logs.push(JobExecutionLog {
        job_name: job_name.to_string(),
        started_at,
        completed_at: Utc::now(),
        status,
        items_processed,
        error,
    });
    if logs.len() > MAX_EXECUTION_LOGS {
        logs.remove(0);
    }
}
