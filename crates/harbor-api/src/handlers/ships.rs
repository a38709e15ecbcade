use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use harbor_domain::{CreateShipRequest, ShipId, ShipStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::dto::ShipView;
use crate::error::ApiError;
use crate::handlers::common::session_id_from_headers;
use crate::state::AppState;

async fn ship_view(state: &AppState, ship: &harbor_domain::Ship) -> Result<ShipView, ApiError> {
    let bindings = state.store.bindings_for_ship(&ship.id).await?;
    Ok(ShipView::from_ship_and_bindings(ship, &bindings, Utc::now()))
}

async fn load_ship(state: &AppState, id: &str) -> Result<harbor_domain::Ship, ApiError> {
    state
        .store
        .get_ship(&ShipId::new(id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("ship '{id}' not found")))
}

// ── GET /ships ───────────────────────────────────────────────────────────────

pub async fn list_ships(State(state): State<AppState>) -> Result<Json<Vec<ShipView>>, ApiError> {
    let ships = state.store.list_ships().await?;
    let mut views = Vec::with_capacity(ships.len());
    for ship in &ships {
        views.push(ship_view(&state, ship).await?);
    }
    Ok(Json(views))
}

// ── POST /ship ───────────────────────────────────────────────────────────────

pub async fn create_ship(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateShipRequest>,
) -> Result<(StatusCode, Json<ShipView>), ApiError> {
    body.validate()?;
    let session_id = session_id_from_headers(&headers)?;

    let ship = state
        .resolver
        .resolve(&session_id, body.ttl, body.spec.as_ref(), body.force_create)
        .await?;

    Ok((StatusCode::CREATED, Json(ship_view(&state, &ship).await?)))
}

// ── GET /ship/{id} ───────────────────────────────────────────────────────────

pub async fn get_ship(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ShipView>, ApiError> {
    let ship = load_ship(&state, &id).await?;
    Ok(Json(ship_view(&state, &ship).await?))
}

// ── DELETE /ship/{id} (soft stop) ───────────────────────────────────────────

pub async fn delete_ship(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let mut ship = load_ship(&state, &id).await?;
    if ship.status == ShipStatus::Stopped {
        return Err(ApiError::not_found(format!("ship '{id}' is already stopped")));
    }

    let now = Utc::now();
    if let Some(handle) = ship.container_handle.clone() {
        if let Err(e) = state.driver.stop_ship_container(&handle).await {
            warn!(ship_id = %id, error = %e, "failed to stop container during soft delete, continuing");
        }
    }
    ship.mark_stopped(now);
    state.store.upsert_ship(&ship).await?;
    state.store.expire_bindings_for_ship(&ship.id, now).await?;
    state.scheduler.cancel(&ship.id).await;

    Ok(StatusCode::NO_CONTENT)
}

// ── DELETE /ship/{id}/permanent ──────────────────────────────────────────────

pub async fn delete_ship_permanent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ship = load_ship(&state, &id).await?;

    if let Some(handle) = &ship.container_handle {
        if let Err(e) = state.driver.stop_ship_container(handle).await {
            warn!(ship_id = %id, error = %e, "failed to stop container during permanent delete, continuing");
        }
    }
    state.scheduler.cancel(&ship.id).await;
    state.store.delete_bindings_for_ship(&ship.id).await?;
    state.store.delete_ship(&ship.id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ── POST /ship/{id}/exec ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecRequestBody {
    #[serde(rename = "type")]
    pub exec_type: String,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub execution_id: Option<String>,
}

pub async fn exec(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ExecRequestBody>,
) -> Result<Json<ExecResponse>, ApiError> {
    let session_id = session_id_from_headers(&headers)?;
    let outcome = state.proxy.execute(&id, &session_id, &body.exec_type, body.payload).await?;

    let success = outcome.data.get("success").and_then(Value::as_bool).unwrap_or(true);
    let error = outcome.data.get("error").and_then(Value::as_str).map(str::to_string);

    Ok(Json(ExecResponse {
        success,
        data: Some(outcome.data),
        error,
        execution_id: outcome.execution_id.map(|id| id.to_string()),
    }))
}

// ── GET /ship/logs/{id} ──────────────────────────────────────────────────────

pub async fn logs(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let ship = load_ship(&state, &id).await?;
    let logs = match &ship.container_handle {
        Some(handle) => state.driver.get_container_logs(handle).await.unwrap_or_default(),
        None => String::new(),
    };
    Ok(Json(serde_json::json!({ "logs": logs })))
}

// ── POST /ship/{id}/extend-ttl ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtendTtlBody {
    pub ttl: i64,
}

pub async fn extend_ttl(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExtendTtlBody>,
) -> Result<Json<ShipView>, ApiError> {
    if body.ttl <= 0 {
        return Err(ApiError::unprocessable(format!("ttl must be positive, got {}", body.ttl)));
    }
    let ship = load_ship(&state, &id).await?;

    let now = Utc::now();
    let bindings = state.store.bindings_for_ship(&ship.id).await?;
    for mut binding in bindings.into_iter().filter(|b| b.is_active(now)) {
        binding.extend(body.ttl, now);
        state.store.upsert_binding(&binding).await?;
    }
    state.scheduler.recalculate_and_schedule(&ship.id).await?;

    let ship = load_ship(&state, &id).await?;
    Ok(Json(ship_view(&state, &ship).await?))
}

// ── POST /ship/{id}/start ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartShipBody {
    pub ttl: i64,
}

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StartShipBody>,
) -> Result<Json<ShipView>, ApiError> {
    if body.ttl <= 0 {
        return Err(ApiError::unprocessable(format!("ttl must be positive, got {}", body.ttl)));
    }
    let session_id = session_id_from_headers(&headers)?;
    let ship = load_ship(&state, &id).await?;
    if ship.status != ShipStatus::Stopped {
        return Err(ApiError::bad_request(format!("ship '{id}' is not stopped")));
    }

    let restored = state.resolver.resolve(&session_id, body.ttl, None, false).await?;
    if restored.id.as_str() != id {
        warn!(requested = %id, restored = %restored.id, "start restored a different ship than requested");
    }

    Ok(Json(ship_view(&state, &restored).await?))
}

// ── POST /ship/{id}/upload ───────────────────────────────────────────────────

pub async fn upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let session_id = session_id_from_headers(&headers)?;

    let mut content: Option<Vec<u8>> = None;
    let mut file_path: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::bad_request(e.to_string()))? {
        match field.name() {
            Some("file") => {
                let bytes = field.bytes().await.map_err(|e| ApiError::bad_request(e.to_string()))?;
                content = Some(bytes.to_vec());
            }
            Some("file_path") => {
                file_path = Some(field.text().await.map_err(|e| ApiError::bad_request(e.to_string()))?);
            }
            _ => {}
        }
    }

    let content = content.ok_or_else(|| ApiError::bad_request("missing 'file' part"))?;
    let file_path = file_path.ok_or_else(|| ApiError::bad_request("missing 'file_path' part"))?;

    let data = state.proxy.upload(&id, &session_id, &file_path, content).await?;
    Ok(Json(data))
}

// ── GET /ship/{id}/download ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub file_path: String,
}

pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = session_id_from_headers(&headers)?;

    match state.proxy.download(&id, &session_id, &q.file_path).await {
        Ok(bytes) => Ok((StatusCode::OK, Bytes::from(bytes)).into_response()),
        Err(harbor_proxy::ProxyError::Forward { status: 404, body }) => {
            Err(ApiError::not_found(format!("file not found: {body}")))
        }
        Err(harbor_proxy::ProxyError::Forward { status: 403, body }) => {
            Err(ApiError::forbidden(format!("path traversal rejected: {body}")))
        }
        Err(e) => Err(ApiError::from(e)),
    }
}
