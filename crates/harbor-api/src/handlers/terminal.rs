use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use harbor_proxy::{admit, relay, ship_terminal_url, Admission, TerminalRequest};
use serde::Deserialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TermQuery {
    pub token: String,
    pub session_id: String,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

/// `WS /ship/{id}/term` — admission is checked before the socket is handed
/// to `on_upgrade`, but per spec.md §4.6 the failure itself is conveyed as a
/// websocket close frame with a distinct code, not an HTTP error status, so
/// the upgrade always proceeds and rejection happens just after accept.
pub async fn term(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<TermQuery>,
) -> impl IntoResponse {
    let req = TerminalRequest {
        ship_id: id.clone(),
        session_id: q.session_id.clone(),
        token: q.token.clone(),
        cols: q.cols,
        rows: q.rows,
    };

    let admission = match admit(&state.store, &state.settings.access_token, &req).await {
        Ok(a) => a,
        Err(e) => {
            warn!(ship_id = %id, error = %e, "store error while admitting terminal connection");
            Admission::Reject { code: harbor_proxy::CLOSE_UPSTREAM_FAILURE, reason: "internal error" }
        }
    };

    ws.on_upgrade(move |socket| async move {
        match admission {
            Admission::Admitted { address } => {
                let url = ship_terminal_url(&address, state.settings.ship_container_port, &q.session_id, q.cols, q.rows);
                relay(socket, &url, &state.store, &id, &q.session_id).await;
            }
            Admission::Reject { code, reason } => {
                reject(socket, code, reason).await;
            }
        }
    })
}

async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
}
