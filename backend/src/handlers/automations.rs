use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use crewbook_shared::{
    ActionOutcome, ActionType, Automation, AutomationRun, CreateAutomation, EventDescriptor,
    SendEmailPayload, TestAutomationRequest, TriggerEvent, UpdateAutomation,
};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::pagination::{PaginatedResponse, QueryBuilder, RunListParams};
use crate::AppState;

const AUTOMATION_COLUMNS: &str = "id, user_id, name, trigger_event, is_active, action_type, action_payload, created_at, updated_at";

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_automations).post(create_automation))
        .route("/events", get(list_events))
        .route("/:id", get(get_automation).put(update_automation).delete(delete_automation))
        .route("/:id/toggle", post(toggle_automation))
        .route("/:id/test", post(test_automation))
        .route("/:id/runs", get(list_automation_runs))
}

pub fn automation_run_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_runs))
}

/// Reject a rule definition that could never execute.
pub fn validate_rule(name: &str, trigger_event: &str, action_type: &str, payload: &Value) -> ApiResult<()> {
    let mut validation = ValidationBuilder::new()
        .check(!name.trim().is_empty(), "name", "Name is required")
        .check(
            trigger_event.parse::<TriggerEvent>().is_ok(),
            "trigger_event",
            "Unknown trigger event",
        );

    match ActionType::from(action_type) {
        ActionType::SendEmail => match serde_json::from_value::<SendEmailPayload>(payload.clone()) {
            Ok(email) => {
                validation = validation
                    .check(!email.subject.trim().is_empty(), "action_payload.subject", "Subject is required")
                    .check(!email.body.trim().is_empty(), "action_payload.body", "Body is required")
                    .check(
                        email.delay_days.is_none_or(|d| d >= 0),
                        "action_payload.delay_days",
                        "Delay must not be negative",
                    )
                    .check(
                        email.days_overdue.is_none_or(|d| d >= 0),
                        "action_payload.days_overdue",
                        "Days overdue must not be negative",
                    );
            }
            Err(_) => {
                validation = validation.error("action_payload", "send_email requires a subject and body");
            }
        },
        ActionType::Unsupported(_) => {
            validation = validation.error("action_type", "Unsupported action type");
        }
    }

    validation.finish()
}

async fn fetch_owned(pool: &PgPool, user_id: Uuid, id: Uuid) -> ApiResult<Automation> {
    sqlx::query_as::<_, Automation>(&format!(
        "SELECT {} FROM automations WHERE id = $1 AND user_id = $2",
        AUTOMATION_COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Automation".to_string()))
}

async fn list_automations(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Automation>>> {
    let automations = sqlx::query_as::<_, Automation>(&format!(
        "SELECT {} FROM automations WHERE user_id = $1 ORDER BY created_at ASC",
        AUTOMATION_COLUMNS
    ))
    .bind(auth.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(automations))
}

async fn list_events() -> Json<Vec<EventDescriptor>> {
    Json(TriggerEvent::ALL.into_iter().map(EventDescriptor::from).collect())
}

async fn create_automation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateAutomation>,
) -> ApiResult<(StatusCode, Json<Automation>)> {
    validate_rule(&payload.name, &payload.trigger_event, &payload.action_type, &payload.action_payload)?;

    let automation = sqlx::query_as::<_, Automation>(&format!(
        r#"
        INSERT INTO automations (id, user_id, name, trigger_event, is_active, action_type, action_payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        AUTOMATION_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .bind(payload.name.trim())
    .bind(&payload.trigger_event)
    .bind(payload.is_active)
    .bind(&payload.action_type)
    .bind(&payload.action_payload)
    .fetch_one(&state.db_pool)
    .await?;

    info!(automation_id = %automation.id, user_id = %auth.user_id, "Automation created for {}", automation.trigger_event);
    Ok((StatusCode::CREATED, Json(automation)))
}

async fn get_automation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Automation>> {
    Ok(Json(fetch_owned(&state.db_pool, auth.user_id, id).await?))
}

async fn update_automation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAutomation>,
) -> ApiResult<Json<Automation>> {
    let existing = fetch_owned(&state.db_pool, auth.user_id, id).await?;

    let name = payload.name.unwrap_or(existing.name);
    let trigger_event = payload.trigger_event.unwrap_or(existing.trigger_event);
    let is_active = payload.is_active.unwrap_or(existing.is_active);
    let action_type = payload.action_type.unwrap_or(existing.action_type);
    let action_payload = payload.action_payload.unwrap_or(existing.action_payload);

    validate_rule(&name, &trigger_event, &action_type, &action_payload)?;

    let automation = sqlx::query_as::<_, Automation>(&format!(
        r#"
        UPDATE automations
        SET name = $3, trigger_event = $4, is_active = $5, action_type = $6, action_payload = $7,
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING {}
        "#,
        AUTOMATION_COLUMNS
    ))
    .bind(id)
    .bind(auth.user_id)
    .bind(name.trim())
    .bind(&trigger_event)
    .bind(is_active)
    .bind(&action_type)
    .bind(&action_payload)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(Json(automation))
}

async fn delete_automation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let result = sqlx::query("DELETE FROM automations WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(auth.user_id)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Automation".to_string()));
    }

    info!(automation_id = %id, user_id = %auth.user_id, "Automation deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_automation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Automation>> {
    let automation = sqlx::query_as::<_, Automation>(&format!(
        r#"
        UPDATE automations SET is_active = NOT is_active, updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING {}
        "#,
        AUTOMATION_COLUMNS
    ))
    .bind(id)
    .bind(auth.user_id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Automation".to_string()))?;

    info!(automation_id = %id, is_active = automation.is_active, "Automation toggled");
    Ok(Json(automation))
}

async fn test_automation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<TestAutomationRequest>,
) -> ApiResult<Json<ActionOutcome>> {
    let automation = fetch_owned(&state.db_pool, auth.user_id, id).await?;
    let outcome = state.automations.test_rule(&automation, request.context).await;
    Ok(Json(outcome))
}

async fn list_automation_runs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Query(mut params): Query<RunListParams>,
) -> ApiResult<Json<PaginatedResponse<AutomationRun>>> {
    fetch_owned(&state.db_pool, auth.user_id, id).await?;
    params.automation_id = Some(id);
    Ok(Json(fetch_runs(&state.db_pool, auth.user_id, &params).await?))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(params): Query<RunListParams>,
) -> ApiResult<Json<PaginatedResponse<AutomationRun>>> {
    Ok(Json(fetch_runs(&state.db_pool, auth.user_id, &params).await?))
}

async fn fetch_runs(
    pool: &PgPool,
    user_id: Uuid,
    params: &RunListParams,
) -> ApiResult<PaginatedResponse<AutomationRun>> {
    let pagination = params.pagination();

    let mut qb = QueryBuilder::new();
    qb.add_condition("user_id = {}");
    qb.add_optional("automation_id = {}", &params.automation_id);
    qb.add_optional("event = {}", &params.event);
    qb.add_optional("result = {}", &params.result);
    let where_clause = qb.where_clause();
    let next = qb.param_count() + 1;

    let count_sql = format!("SELECT COUNT(*) FROM automation_runs {}", where_clause);
    let list_sql = format!(
        r#"
        SELECT id, user_id, automation_id, event, input, result, output, created_at
        FROM automation_runs {}
        ORDER BY created_at DESC
        LIMIT ${} OFFSET ${}
        "#,
        where_clause,
        next,
        next + 1
    );

    let mut count = sqlx::query_scalar::<_, i64>(&count_sql).bind(user_id);
    let mut list = sqlx::query_as::<_, AutomationRun>(&list_sql).bind(user_id);
    if let Some(automation_id) = params.automation_id {
        count = count.bind(automation_id);
        list = list.bind(automation_id);
    }
    if let Some(event) = &params.event {
        count = count.bind(event.clone());
        list = list.bind(event.clone());
    }
    if let Some(result) = &params.result {
        count = count.bind(result.clone());
        list = list.bind(result.clone());
    }

    let total = count.fetch_one(pool).await?;
    let runs = list
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

    Ok(PaginatedResponse::new(runs, &pagination, total))
}
