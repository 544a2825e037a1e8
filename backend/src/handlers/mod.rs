use axum::{extract::State, http::StatusCode, response::Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::database::{self, PoolStats};
use crate::jobs::JobExecutionLog;
use crate::AppState;

pub mod automations;
pub mod clients;
pub mod estimates;
pub mod jobs;
pub mod leads;

pub use automations::{automation_routes, automation_run_routes};
pub use clients::client_routes;
pub use estimates::{estimate_routes, public_estimate_routes};
pub use jobs::job_routes;
pub use leads::lead_routes;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub services: HashMap<String, ServiceStatus>,
    pub pool: PoolStats,
    pub recent_jobs: Vec<JobExecutionLog>,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({"status": "healthy", "service": "crewbook-api"})))
}

/// Database reachability, mail provider presence and recent background jobs.
/// 503 only when the database is down; missing mail config is reported as degraded.
pub async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthCheckResponse>) {
    let started = Instant::now();
    let db_healthy = database::health_check(&state.db_pool).await;
    let db_status = ServiceStatus {
        status: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
        response_time_ms: Some(started.elapsed().as_millis() as u64),
        details: None,
    };

    let mail_status = if state.automations.mail_configured() {
        ServiceStatus { status: "healthy".to_string(), response_time_ms: None, details: None }
    } else {
        ServiceStatus {
            status: "unconfigured".to_string(),
            response_time_ms: None,
            details: Some(json!({ "message": "Automation emails will fail until a mail provider is configured" })),
        }
    };

    let (code, status) = match (db_healthy, state.automations.mail_configured()) {
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        (true, false) => (StatusCode::OK, "degraded"),
        (true, true) => (StatusCode::OK, "healthy"),
    };

    let mut services = HashMap::new();
    services.insert("database".to_string(), db_status);
    services.insert("mail".to_string(), mail_status);

    let response = HealthCheckResponse {
        status: status.to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
        pool: database::get_pool_stats(&state.db_pool),
        recent_jobs: state.job_logs.read().await.clone(),
    };

    (code, Json(response))
}
