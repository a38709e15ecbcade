use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use harbor_domain::{Binding, ExecKind, ExecutionRecordId, SessionId, ShipId};
use harbor_store::ExecutionHistoryFilter;
use serde::{Deserialize, Serialize};

use crate::dto::{HistoryEntryView, SessionView};
use crate::error::ApiError;
use crate::state::AppState;

/// The binding a session's views are built from: the most recently active
/// one, or — if none is currently active — the most recently updated one,
/// so a session with only a Stopped Ship in its past still shows up.
async fn representative_binding(state: &AppState, session_id: &SessionId) -> Result<Option<Binding>, ApiError> {
    let bindings = state.store.bindings_for_session(session_id).await?;
    let now = Utc::now();
    let chosen = bindings
        .iter()
        .filter(|b| b.is_active(now))
        .max_by_key(|b| b.last_activity)
        .or_else(|| bindings.iter().max_by_key(|b| b.last_activity))
        .cloned();
    Ok(chosen)
}

// ── GET /sessions ────────────────────────────────────────────────────────────

pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<SessionView>>, ApiError> {
    let session_ids = state.store.list_session_ids().await?;
    let now = Utc::now();
    let mut views = Vec::with_capacity(session_ids.len());
    for session_id in &session_ids {
        if let Some(binding) = representative_binding(&state, session_id).await? {
            views.push(SessionView::from_binding(&binding, now));
        }
    }
    Ok(Json(views))
}

// ── GET /sessions/{id} ───────────────────────────────────────────────────────

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SessionView>, ApiError> {
    let session_id = SessionId::new(id)?;
    let binding = representative_binding(&state, &session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session '{session_id}' not found")))?;
    Ok(Json(SessionView::from_binding(&binding, Utc::now())))
}

// ── GET /ship/{id}/sessions ──────────────────────────────────────────────────

pub async fn ship_sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let ship_id = ShipId::new(id);
    let bindings = state.store.bindings_for_ship(&ship_id).await?;
    let now = Utc::now();
    Ok(Json(bindings.iter().map(|b| SessionView::from_binding(b, now)).collect()))
}

// ── POST /sessions/{id}/extend-ttl ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtendTtlBody {
    pub ttl: i64,
}

pub async fn extend_ttl(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExtendTtlBody>,
) -> Result<Json<SessionView>, ApiError> {
    if body.ttl <= 0 {
        return Err(ApiError::unprocessable(format!("ttl must be positive, got {}", body.ttl)));
    }
    let session_id = SessionId::new(id)?;
    let mut binding = representative_binding(&state, &session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session '{session_id}' not found")))?;

    let now = Utc::now();
    binding.extend(body.ttl, now);
    state.store.upsert_binding(&binding).await?;
    state.scheduler.recalculate_and_schedule(&binding.ship_id).await?;

    Ok(Json(SessionView::from_binding(&binding, now)))
}

// ── DELETE /sessions/{id} ─────────────────────────────────────────────────────

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let session_id = SessionId::new(id)?;
    let bindings = state.store.bindings_for_session(&session_id).await?;
    let mut affected_ships: Vec<ShipId> = bindings.iter().map(|b| b.ship_id.clone()).collect();
    affected_ships.dedup();

    state.store.delete_bindings_for_session(&session_id).await?;
    for ship_id in &affected_ships {
        state.scheduler.recalculate_and_schedule(ship_id).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

// ── GET /sessions/{id}/history ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub exec_type: Option<ExecKind>,
    #[serde(default)]
    pub success_only: bool,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    pub tags: Option<String>,
    pub has_notes: Option<bool>,
    pub has_description: Option<bool>,
}

impl From<HistoryQuery> for ExecutionHistoryFilter {
    fn from(q: HistoryQuery) -> Self {
        ExecutionHistoryFilter {
            exec_type: q.exec_type,
            success_only: q.success_only,
            limit: q.limit,
            offset: q.offset,
            tag_contains: q.tags,
            has_notes: q.has_notes,
            has_description: q.has_description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntryView>,
    pub total: usize,
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    let session_id = SessionId::new(id)?;
    let filter: ExecutionHistoryFilter = q.into();
    let (records, total) = state.store.list_execution_records(&session_id, &filter).await?;
    Ok(Json(HistoryPage { entries: records.iter().map(HistoryEntryView::from).collect(), total }))
}

// ── GET /sessions/{id}/history/{exec_id} ─────────────────────────────────────

pub async fn history_entry(
    State(state): State<AppState>,
    Path((id, exec_id)): Path<(String, String)>,
) -> Result<Json<HistoryEntryView>, ApiError> {
    let session_id = SessionId::new(id)?;
    let record = load_owned_record(&state, &session_id, &exec_id).await?;
    Ok(Json(HistoryEntryView::from(&record)))
}

// ── GET /sessions/{id}/history/last ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LastHistoryQuery {
    pub exec_type: Option<ExecKind>,
}

pub async fn history_last(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<LastHistoryQuery>,
) -> Result<Json<HistoryEntryView>, ApiError> {
    let session_id = SessionId::new(id)?;
    let filter = ExecutionHistoryFilter { exec_type: q.exec_type, ..Default::default() };
    let record = state
        .store
        .last_execution_record(&session_id, &filter)
        .await?
        .ok_or_else(|| ApiError::not_found("no execution records for this session"))?;
    Ok(Json(HistoryEntryView::from(&record)))
}

// ── PATCH /sessions/{id}/history/{exec_id} ───────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotateBody {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
}

pub async fn annotate(
    State(state): State<AppState>,
    Path((id, exec_id)): Path<(String, String)>,
    Json(body): Json<AnnotateBody>,
) -> Result<Json<HistoryEntryView>, ApiError> {
    let session_id = SessionId::new(id)?;
    load_owned_record(&state, &session_id, &exec_id).await?;

    let tags = body.tags.map(|ts| ts.join(","));
    let updated = state
        .store
        .update_execution_record_annotations(&ExecutionRecordId(exec_id.clone()), body.description, tags, body.notes)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("execution record '{exec_id}' not found")))?;

    Ok(Json(HistoryEntryView::from(&updated)))
}

async fn load_owned_record(
    state: &AppState,
    session_id: &SessionId,
    exec_id: &str,
) -> Result<harbor_domain::ExecutionRecord, ApiError> {
    let record = state
        .store
        .get_execution_record(&ExecutionRecordId(exec_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("execution record '{exec_id}' not found")))?;
    if &record.session_id != session_id {
        return Err(ApiError::not_found(format!("execution record '{exec_id}' not found")));
    }
    Ok(record)
}
