// Delayed queue - executes deferred automation runs once they fall due

use chrono::{DateTime, Duration, Utc};
use crewbook_shared::TriggerEvent;
use tracing::{error, info, warn};

use super::engine::AutomationEngine;
use super::events::EventContext;
use super::store::{ScheduledRun, ScheduledRunStatus, StoreError, SystemActor};

/// Shortest time, in minutes, a claimed row stays with its worker before
/// another dispatch may take it over.
const MIN_CLAIM_LEASE_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub claimed: usize,
    pub executed: usize,
    pub cancelled: usize,
    pub requeued: usize,
}

enum Disposition {
    Executed,
    Cancelled,
    Requeued,
}

impl AutomationEngine {
    /// Claim up to `limit` due rows and run each one whose rule is still active.
    ///
    /// Rows left `running` by a dispatcher that died mid-batch are claimed
    /// again once their lease runs out, so a crash can repeat an action but
    /// never strands it.
    pub async fn dispatch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<DispatchSummary, StoreError> {
        let stale_before = now - self.claim_lease(limit);
        let claimed = self.store.claim_due_runs(now, stale_before, limit).await?;
        let mut summary = DispatchSummary { claimed: claimed.len(), ..Default::default() };

        for scheduled in claimed {
            let id = scheduled.id;
            let status = match self.run_scheduled(scheduled).await {
                Disposition::Executed => {
                    summary.executed += 1;
                    ScheduledRunStatus::Done
                }
                Disposition::Cancelled => {
                    summary.cancelled += 1;
                    ScheduledRunStatus::Cancelled
                }
                Disposition::Requeued => {
                    summary.requeued += 1;
                    ScheduledRunStatus::Pending
                }
            };

            if let Err(e) = self.store.finish_scheduled_run(id, status).await {
                error!(scheduled_id = %id, "Failed to update scheduled automation run: {}", e);
            }
        }

        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                executed = summary.executed,
                cancelled = summary.cancelled,
                requeued = summary.requeued,
                "Dispatched delayed automations"
            );
        }

        Ok(summary)
    }

    /// Twice the time a full batch could take if every action exhausted its
    /// retries.
    fn claim_lease(&self, limit: i64) -> Duration {
        let rows = u32::try_from(limit.max(1)).unwrap_or(u32::MAX);
        let batch = self.executor.settings().worst_case().saturating_mul(rows).saturating_mul(2);
        Duration::from_std(batch).unwrap_or(Duration::days(1)).max(Duration::minutes(MIN_CLAIM_LEASE_MINUTES))
    }

    async fn run_scheduled(&self, scheduled: ScheduledRun) -> Disposition {
        let Ok(trigger) = scheduled.event.parse::<TriggerEvent>() else {
            warn!(scheduled_id = %scheduled.id, "Unknown event '{}' on delayed run", scheduled.event);
            return Disposition::Cancelled;
        };
        let Ok(context) = EventContext::try_from(scheduled.context) else {
            warn!(scheduled_id = %scheduled.id, "Delayed run context is not an object");
            return Disposition::Cancelled;
        };

        let actor = SystemActor::for_user(scheduled.user_id);
        let rule = match self.store.find_active_rule(&actor, scheduled.automation_id).await {
            Ok(Some(rule)) if rule.trigger_event == trigger.as_str() => rule,
            Ok(_) => {
                info!(
                    scheduled_id = %scheduled.id,
                    automation_id = %scheduled.automation_id,
                    "Automation no longer active for this event, dropping delayed run"
                );
                return Disposition::Cancelled;
            }
            Err(e) => {
                error!(scheduled_id = %scheduled.id, "Failed to load automation for delayed run: {}", e);
                return Disposition::Requeued;
            }
        };

        self.execute_and_log(&actor, &rule, trigger, &context).await;
        Disposition::Executed
    }
}
