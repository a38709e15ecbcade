use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use harbor_domain::ShipStatus;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `GET /health` — bare liveness, unauthenticated, no Store access.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// `GET /stat` — public service identity, no Store access either so it
/// stays up even if the backing Store is unreachable.
pub async fn stat() -> Json<Value> {
    Json(json!({
        "service": "harbor",
        "version": VERSION,
        "status": "ok",
    }))
}

/// `GET /stat/overview` — auth-gated counts across Ships and sessions.
pub async fn stat_overview(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let ships = state.store.list_ships().await?;
    let mut running = 0usize;
    let mut stopped = 0usize;
    let mut creating = 0usize;
    for ship in &ships {
        match ship.status {
            ShipStatus::Running => running += 1,
            ShipStatus::Stopped => stopped += 1,
            ShipStatus::Creating => creating += 1,
        }
    }

    let now = Utc::now();
    let sessions = state.store.list_session_ids().await?;
    let mut active_sessions = 0usize;
    for session_id in &sessions {
        let bindings = state.store.bindings_for_session(session_id).await?;
        if bindings.iter().any(|b| b.is_active(now)) {
            active_sessions += 1;
        }
    }

    Ok(Json(json!({
        "service": "harbor",
        "version": VERSION,
        "status": "ok",
        "ships": {
            "total": ships.len(),
            "running": running,
            "stopped": stopped,
            "creating": creating,
        },
        "sessions": {
            "total": sessions.len(),
            "active": active_sessions,
        },
    })))
}
