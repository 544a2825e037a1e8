// Run Logger - best-effort audit rows for automation executions

use crewbook_shared::{ActionOutcome, TriggerEvent};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use super::events::EventContext;
use super::store::{AutomationStore, NewRun, SystemActor};

#[derive(Clone)]
pub struct RunRecorder {
    store: Arc<dyn AutomationStore>,
}

impl RunRecorder {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }

    /// Write one audit row. Storage failures are logged and dropped.
    pub async fn log_run(
        &self,
        actor: &SystemActor,
        automation_id: Uuid,
        event: TriggerEvent,
        input: &EventContext,
        outcome: &ActionOutcome,
    ) -> Option<Uuid> {
        let run = NewRun { automation_id, event, input, outcome };

        match self.store.insert_run(actor, run).await {
            Ok(run_id) => {
                debug!(%run_id, %automation_id, result = outcome.status().as_str(), "Automation run logged");
                Some(run_id)
            }
            Err(e) => {
                error!(
                    %automation_id,
                    user_id = %actor.user_id(),
                    %event,
                    "Failed to log automation run: {}",
                    e
                );
                None
            }
        }
    }
}
