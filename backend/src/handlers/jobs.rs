use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use crewbook_shared::{CreateJob, Job};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use super::clients::{fetch_client, JoinedClient, JOINED_CLIENT_COLUMNS};
use crate::auth::AuthUser;
use crate::automations::BusinessEvent;
use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::AppState;

const JOB_COLUMNS: &str = "id, user_id, client_id, estimate_id, title, status, scheduled_for, completed_at, created_at, updated_at";

#[derive(FromRow)]
struct CompletedJob {
    #[sqlx(flatten)]
    job: Job,
    #[sqlx(flatten)]
    client: JoinedClient,
}

pub fn job_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/:id/complete", post(complete_job))
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Job>>> {
    let jobs = sqlx::query_as::<_, Job>(&format!(
        "SELECT {} FROM jobs WHERE user_id = $1 ORDER BY scheduled_for NULLS LAST, created_at DESC",
        JOB_COLUMNS
    ))
    .bind(auth.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(jobs))
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    ValidationBuilder::new()
        .check(!payload.title.trim().is_empty(), "title", "Title is required")
        .finish()?;

    fetch_client(&state.db_pool, auth.user_id, payload.client_id).await?;

    let job = sqlx::query_as::<_, Job>(&format!(
        r#"
        INSERT INTO jobs (id, user_id, client_id, estimate_id, title, status, scheduled_for)
        VALUES ($1, $2, $3, $4, $5, 'scheduled', $6)
        RETURNING {}
        "#,
        JOB_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .bind(payload.client_id)
    .bind(payload.estimate_id)
    .bind(payload.title.trim())
    .bind(payload.scheduled_for)
    .fetch_one(&state.db_pool)
    .await?;

    Ok((StatusCode::CREATED, Json(job)))
}

async fn complete_job(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    let completed = sqlx::query_as::<_, CompletedJob>(&format!(
        r#"
        UPDATE jobs j SET status = 'completed', completed_at = NOW(), updated_at = NOW()
        FROM clients c
        WHERE j.id = $1 AND j.user_id = $2 AND j.status <> 'completed' AND c.id = j.client_id
        RETURNING j.id, j.user_id, j.client_id, j.estimate_id, j.title, j.status, j.scheduled_for,
                  j.completed_at, j.created_at, j.updated_at, {}
        "#,
        JOINED_CLIENT_COLUMNS
    ))
    .bind(id)
    .bind(auth.user_id)
    .fetch_optional(&state.db_pool)
    .await?;

    let Some(CompletedJob { job, client }) = completed else {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM jobs WHERE id = $1 AND user_id = $2)")
            .bind(id)
            .bind(auth.user_id)
            .fetch_one(&state.db_pool)
            .await?;

        return Err(if exists {
            AppError::Conflict("Job is already completed".to_string())
        } else {
            AppError::NotFound("Job".to_string())
        });
    };

    state.automations.emit(BusinessEvent::JobCompleted {
        user_id: job.user_id,
        job_id: job.id,
        job_title: job.title.clone(),
        client: client.into_ref(job.client_id),
    });

    Ok(Json(job))
}
