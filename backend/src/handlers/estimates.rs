use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use crewbook_shared::{CreateEstimate, Estimate};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::clients::{fetch_client, JoinedClient, JOINED_CLIENT_COLUMNS};
use crate::auth::AuthUser;
use crate::automations::{BusinessEvent, ClientRef, EstimateRef};
use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::AppState;

const ESTIMATE_COLUMNS: &str = "id, user_id, client_id, estimate_number, title, amount, status, sent_at, approved_at, created_at, updated_at";

/// `ESTIMATE_COLUMNS` for `estimates` aliased as `e`.
const JOINED_ESTIMATE_COLUMNS: &str = "e.id, e.user_id, e.client_id, e.estimate_number, e.title, e.amount, e.status, \
     e.sent_at, e.approved_at, e.created_at, e.updated_at";

/// An estimate after a status change, with the client its event goes to.
#[derive(FromRow)]
struct ChangedEstimate {
    #[sqlx(flatten)]
    estimate: Estimate,
    #[sqlx(flatten)]
    client: JoinedClient,
}

impl ChangedEstimate {
    fn into_parts(self) -> (Estimate, EstimateRef, ClientRef) {
        let estimate_ref = EstimateRef::from(&self.estimate);
        let client = self.client.into_ref(self.estimate.client_id);
        (self.estimate, estimate_ref, client)
    }
}

pub fn estimate_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_estimates).post(create_estimate))
        .route("/:id", get(get_estimate))
        .route("/:id/send", post(send_estimate))
}

/// Routes reached from links in emails sent to clients; no session required.
pub fn public_estimate_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:id/approve", post(approve_estimate))
}

impl From<&Estimate> for EstimateRef {
    fn from(estimate: &Estimate) -> Self {
        Self {
            id: estimate.id,
            number: estimate.estimate_number.clone(),
            amount: estimate.amount,
        }
    }
}

async fn list_estimates(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Estimate>>> {
    let estimates = sqlx::query_as::<_, Estimate>(&format!(
        "SELECT {} FROM estimates WHERE user_id = $1 ORDER BY created_at DESC",
        ESTIMATE_COLUMNS
    ))
    .bind(auth.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(estimates))
}

async fn create_estimate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateEstimate>,
) -> ApiResult<(StatusCode, Json<Estimate>)> {
    ValidationBuilder::new()
        .check(!payload.title.trim().is_empty(), "title", "Title is required")
        .check(payload.amount >= Decimal::ZERO, "amount", "Amount must not be negative")
        .finish()?;

    // Ownership check on the client before linking to it.
    fetch_client(&state.db_pool, auth.user_id, payload.client_id).await?;

    let estimate = sqlx::query_as::<_, Estimate>(&format!(
        r#"
        INSERT INTO estimates (id, user_id, client_id, estimate_number, title, amount, status)
        VALUES ($1, $2, $3, $4, $5, $6, 'draft')
        RETURNING {}
        "#,
        ESTIMATE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .bind(payload.client_id)
    .bind(&payload.estimate_number)
    .bind(payload.title.trim())
    .bind(payload.amount)
    .fetch_one(&state.db_pool)
    .await?;

    Ok((StatusCode::CREATED, Json(estimate)))
}

async fn get_estimate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Estimate>> {
    let estimate = sqlx::query_as::<_, Estimate>(&format!(
        "SELECT {} FROM estimates WHERE id = $1 AND user_id = $2",
        ESTIMATE_COLUMNS
    ))
    .bind(id)
    .bind(auth.user_id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Estimate".to_string()))?;

    Ok(Json(estimate))
}

async fn send_estimate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Estimate>> {
    let changed = sqlx::query_as::<_, ChangedEstimate>(&format!(
        r#"
        UPDATE estimates e SET status = 'sent', sent_at = NOW(), updated_at = NOW()
        FROM clients c
        WHERE e.id = $1 AND e.user_id = $2 AND e.status IN ('draft', 'sent') AND c.id = e.client_id
        RETURNING {}, {}
        "#,
        JOINED_ESTIMATE_COLUMNS, JOINED_CLIENT_COLUMNS
    ))
    .bind(id)
    .bind(auth.user_id)
    .fetch_optional(&state.db_pool)
    .await?;

    let Some(changed) = changed else {
        return Err(missing_or_conflict(&state.db_pool, id, Some(auth.user_id), "sent").await);
    };

    let (estimate, estimate_ref, client) = changed.into_parts();
    state.automations.emit(BusinessEvent::EstimateSent {
        user_id: estimate.user_id,
        estimate: estimate_ref,
        client,
    });

    Ok(Json(estimate))
}

/// Client-side approval. Acts for whoever owns the estimate.
async fn approve_estimate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Estimate>> {
    let changed = sqlx::query_as::<_, ChangedEstimate>(&format!(
        r#"
        UPDATE estimates e SET status = 'approved', approved_at = NOW(), updated_at = NOW()
        FROM clients c
        WHERE e.id = $1 AND e.status = 'sent' AND c.id = e.client_id
        RETURNING {}, {}
        "#,
        JOINED_ESTIMATE_COLUMNS, JOINED_CLIENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await?;

    let Some(changed) = changed else {
        return Err(missing_or_conflict(&state.db_pool, id, None, "approved").await);
    };

    let (estimate, estimate_ref, client) = changed.into_parts();
    info!(estimate_id = %estimate.id, user_id = %estimate.user_id, "Estimate approved by client");

    state.automations.emit(BusinessEvent::EstimateApproved {
        user_id: estimate.user_id,
        estimate: estimate_ref,
        client,
    });

    Ok(Json(estimate))
}

/// Explain why a status transition matched no row.
async fn missing_or_conflict(pool: &PgPool, id: Uuid, user_id: Option<Uuid>, target: &str) -> AppError {
    let status = sqlx::query_scalar::<_, String>(
        "SELECT status FROM estimates WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await;

    match status {
        Ok(Some(status)) => AppError::Conflict(format!("Estimate is {} and cannot be {}", status, target)),
        Ok(None) => AppError::NotFound("Estimate".to_string()),
        Err(e) => AppError::from(e),
    }
}
