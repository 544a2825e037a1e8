use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use crewbook_shared::{Client, CreateClient};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::automations::{BusinessEvent, ClientRef};
use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::AppState;

const CLIENT_COLUMNS: &str = "id, user_id, name, email, phone, address, notes, created_at, updated_at";

pub fn client_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_clients).post(create_client))
        .route("/:id", get(get_client))
}

impl From<&Client> for ClientRef {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id,
            name: client.name.clone(),
            email: client.email.clone(),
            phone: client.phone.clone(),
        }
    }
}

/// Client fields selected alongside another row, from `clients` joined as `c`.
pub(crate) const JOINED_CLIENT_COLUMNS: &str = "c.name AS client_name, c.email AS client_email, c.phone AS client_phone";

#[derive(Debug, FromRow)]
pub(crate) struct JoinedClient {
    client_name: String,
    client_email: Option<String>,
    client_phone: Option<String>,
}

impl JoinedClient {
    pub(crate) fn into_ref(self, client_id: Uuid) -> ClientRef {
        ClientRef {
            id: client_id,
            name: self.client_name,
            email: self.client_email,
            phone: self.client_phone,
        }
    }
}

/// The owner's client, or 404.
pub(crate) async fn fetch_client(pool: &PgPool, user_id: Uuid, client_id: Uuid) -> ApiResult<Client> {
    sqlx::query_as::<_, Client>(&format!(
        "SELECT {} FROM clients WHERE id = $1 AND user_id = $2",
        CLIENT_COLUMNS
    ))
    .bind(client_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Client".to_string()))
}

async fn list_clients(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Client>>> {
    let clients = sqlx::query_as::<_, Client>(&format!(
        "SELECT {} FROM clients WHERE user_id = $1 ORDER BY name",
        CLIENT_COLUMNS
    ))
    .bind(auth.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(clients))
}

async fn create_client(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateClient>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    ValidationBuilder::new()
        .check(!payload.name.trim().is_empty(), "name", "Name is required")
        .finish()?;

    let client = sqlx::query_as::<_, Client>(&format!(
        r#"
        INSERT INTO clients (id, user_id, name, email, phone, address, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        CLIENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(auth.user_id)
    .bind(payload.name.trim())
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.address)
    .bind(&payload.notes)
    .fetch_one(&state.db_pool)
    .await?;

    state.automations.emit(BusinessEvent::ClientCreated {
        user_id: auth.user_id,
        client: ClientRef::from(&client),
    });

    Ok((StatusCode::CREATED, Json(client)))
}

async fn get_client(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    Ok(Json(fetch_client(&state.db_pool, auth.user_id, id).await?))
}
