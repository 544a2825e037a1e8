use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use crewbook_shared::{CreateLead, LEAD_STAGES, Lead, UpdateLeadStage};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::automations::{BusinessEvent, LeadRef, StageChange};
use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::AppState;

const LEAD_COLUMNS: &str = "id, user_id, name, email, phone, address, source, status, created_at, updated_at";

pub fn lead_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_leads).post(create_lead))
        .route("/:id/stage", put(update_lead_stage))
}

impl From<&Lead> for LeadRef {
    fn from(lead: &Lead) -> Self {
        Self {
            id: lead.id,
            name: lead.name.clone(),
            email: lead.email.clone(),
            phone: lead.phone.clone(),
            address: lead.address.clone(),
        }
    }
}

#[derive(FromRow)]
struct MovedLead {
    #[sqlx(flatten)]
    lead: Lead,
    old_status: String,
}

async fn list_leads(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Lead>>> {
    let leads = sqlx::query_as::<_, Lead>(&format!(
        "SELECT {} FROM leads WHERE user_id = $1 ORDER BY created_at DESC",
        LEAD_COLUMNS
    ))
    .bind(auth.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(leads))
}

async fn create_lead(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateLead>,
) -> ApiResult<(StatusCode, Json<Lead>)> {
    ValidationBuilder::new()
        .check(!payload.name.trim().is_empty(), "name", "Name is required")
        .finish()?;

    let lead = sqlx::query_as::<_, Lead>(&format!(
        r#"
        INSERT INTO leads (id, user_id, name, email, phone, address, source, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'new')
        RETURNING {}
        "#,
        LEAD_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .bind(payload.name.trim())
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.address)
    .bind(&payload.source)
    .fetch_one(&state.db_pool)
    .await?;

    state.automations.emit(BusinessEvent::LeadCreated {
        user_id: auth.user_id,
        lead: LeadRef::from(&lead),
    });

    Ok((StatusCode::CREATED, Json(lead)))
}

async fn update_lead_stage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLeadStage>,
) -> ApiResult<Json<Lead>> {
    ValidationBuilder::new()
        .check(LEAD_STAGES.contains(&payload.status.as_str()), "status", "Unknown lead stage")
        .finish()?;

    let moved = sqlx::query_as::<_, MovedLead>(
        r#"
        UPDATE leads l SET status = $3, updated_at = NOW()
        FROM (SELECT id, status AS old_status FROM leads WHERE id = $1 AND user_id = $2 FOR UPDATE) prev
        WHERE l.id = prev.id
        RETURNING l.id, l.user_id, l.name, l.email, l.phone, l.address, l.source, l.status,
                  l.created_at, l.updated_at, prev.old_status
        "#,
    )
    .bind(id)
    .bind(auth.user_id)
    .bind(&payload.status)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Lead".to_string()))?;

    let change = StageChange {
        old_status: Some(moved.old_status),
        new_status: moved.lead.status.clone(),
    };

    match BusinessEvent::lead_stage_changed(auth.user_id, LeadRef::from(&moved.lead), change) {
        Some(event) => {
            state.automations.emit(event);
        }
        None => debug!(lead_id = %id, "Lead stage change has no automation trigger"),
    }

    Ok(Json(moved.lead))
}
