use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod automations;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod pagination;
mod services;


use automations::{ActionExecutor, AutomationEngine, ExecutorSettings, PgAutomationStore};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub config: config::Config,
    pub automations: AutomationEngine,
    pub job_logs: jobs::ExecutionLogs,
}

/// Engine backed by Postgres and whichever mail provider the config names.
/// A provider that can't be built leaves the engine without mail; the API
/// still starts and email actions log failed runs.
pub fn build_engine(db_pool: sqlx::PgPool, config: &config::Config) -> AutomationEngine {
    let mailer = match services::build_mailer(&config.mail) {
        Ok(Some(mailer)) => Some(mailer),
        Ok(None) => {
            tracing::warn!("No mail provider configured, send_email automations will fail");
            None
        }
        Err(e) => {
            tracing::error!("Mail provider misconfigured, send_email automations will fail: {}", e);
            None
        }
    };

    let settings = ExecutorSettings::new(config.environment, &config.mail.from_name, &config.automation);
    let store = Arc::new(PgAutomationStore::new(db_pool));
    AutomationEngine::new(store, ActionExecutor::new(mailer, settings))
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Crewbook API v1" }))
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health_check))
        .nest("/api/v1/clients", handlers::client_routes())
        .nest("/api/v1/estimates", handlers::estimate_routes())
        .nest("/api/v1/public/estimates", handlers::public_estimate_routes())
        .nest("/api/v1/jobs", handlers::job_routes())
        .nest("/api/v1/leads", handlers::lead_routes())
        .nest("/api/v1/automations", handlers::automation_routes())
        .nest("/api/v1/automation-runs", handlers::automation_run_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let engine = build_engine(db_pool.clone(), &config);

    let mut scheduler = jobs::JobScheduler::new(db_pool.clone(), engine.clone(), config.automation.clone()).await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        db_pool,
        config,
        automations: engine,
        job_logs: scheduler.execution_logs(),
    });

    let server_addr = app_state.config.server_addr.clone();
    let app = app_router(app_state);

    let listener = tokio::net::TcpListener::bind(&server_addr).await?;
    tracing::info!("Server running on {}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}
