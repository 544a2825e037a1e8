// Automations - event-driven rules that email clients and leads

pub mod engine;
pub mod events;
pub mod executor;
pub mod queue;
pub mod recorder;
pub mod store;
pub mod template;

pub use engine::AutomationEngine;
pub use events::{BusinessEvent, ClientRef, EstimateRef, InvoiceRef, LeadRef, StageChange};
pub use executor::{ActionExecutor, ExecutorSettings};
pub use store::{PgAutomationStore, StoreError};
